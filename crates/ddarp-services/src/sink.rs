//! Path-decision sink — turns successive routing tables into data-plane
//! recommendations.
//!
//! The sink is pure: it opens no sockets and speaks no BGP. It diffs the
//! table it is handed against what it last emitted and calls into a
//! [`DataPlane`] implementation. The daemon wires in a logging adapter;
//! real deployments put the eBGP speaker and the tunnel orchestrator
//! behind the same trait.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Mutex;

use crate::routing::RoutingTable;
use crate::topology::TopologySnapshot;

/// A tunnel is recommended only when the direct edge is this good.
pub const TUNNEL_MAX_LATENCY_MS: f64 = 10.0;
pub const TUNNEL_MAX_LOSS: f64 = 0.01;

/// Re-advertise only when the cost moved by more than this fraction.
pub const ADVERTISE_HYSTERESIS: f64 = 0.20;

// A tunnel is released after its next hop has gone unused for this many
// consecutive passes.
const TUNNEL_UNUSED_PASSES: u32 = 2;

// BGP community ASNs carrying the OWL triple.
pub const COMMUNITY_LATENCY: u16 = 65000;
pub const COMMUNITY_JITTER: u16 = 65001;
pub const COMMUNITY_LOSS: u16 = 65002;

/// Encode the OWL triple as BGP community values: value times ten,
/// clamped to the u16 range.
pub fn owl_communities(latency_ms: f64, jitter_ms: f64, loss_ratio: f64) -> [(u16, u16); 3] {
    [
        (COMMUNITY_LATENCY, clamp_community(latency_ms * 10.0)),
        (COMMUNITY_JITTER, clamp_community(jitter_ms * 10.0)),
        (COMMUNITY_LOSS, clamp_community(loss_ratio * 100.0 * 10.0)),
    ]
}

fn clamp_community(value: f64) -> u16 {
    value.max(0.0).min(f64::from(u16::MAX)) as u16
}

/// One route recommendation handed to the data plane.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteAdvertisement {
    pub destination: String,
    pub next_hop: String,
    pub latency_ms: f64,
    pub jitter_ms: f64,
    pub loss_ratio: f64,
}

/// The seam to the eBGP speaker and the tunnel orchestrator.
pub trait DataPlane: Send + Sync {
    fn advertise(&self, advert: &RouteAdvertisement);
    fn revoke(&self, destination: &str);
    fn request_tunnel(&self, peer_id: &str, endpoint: SocketAddr);
    fn release_tunnel(&self, peer_id: &str);
}

/// What one sink pass emitted, for logging and tests.
#[derive(Debug, Default, PartialEq)]
pub struct SinkReport {
    pub advertised: Vec<String>,
    pub revoked: Vec<String>,
    pub tunnels_requested: Vec<String>,
    pub tunnels_released: Vec<String>,
}

impl SinkReport {
    pub fn is_quiet(&self) -> bool {
        self.advertised.is_empty()
            && self.revoked.is_empty()
            && self.tunnels_requested.is_empty()
            && self.tunnels_released.is_empty()
    }
}

pub struct DecisionSink {
    local_id: String,
    /// destination → cost last advertised for it.
    advertised: BTreeMap<String, f64>,
    /// next hop → consecutive passes it has gone unused.
    tunnels: BTreeMap<String, u32>,
}

impl DecisionSink {
    pub fn new(local_id: &str) -> Self {
        Self {
            local_id: local_id.to_string(),
            advertised: BTreeMap::new(),
            tunnels: BTreeMap::new(),
        }
    }

    /// Diff `table` against the last emitted state.
    ///
    /// `endpoints` maps peer ids to their transport addresses for tunnel
    /// requests; `topology` supplies per-edge metrics for advertisements
    /// and the tunnel criteria.
    pub fn apply(
        &mut self,
        table: &RoutingTable,
        topology: &TopologySnapshot,
        endpoints: &BTreeMap<String, SocketAddr>,
        plane: &dyn DataPlane,
    ) -> SinkReport {
        let mut report = SinkReport::default();

        // route advertisements
        for entry in table.entries() {
            let needs_emit = match self.advertised.get(&entry.destination) {
                None => true,
                Some(last_cost) if *last_cost > 0.0 => {
                    (entry.cost - last_cost).abs() / last_cost > ADVERTISE_HYSTERESIS
                }
                Some(last_cost) => (entry.cost - last_cost).abs() > f64::EPSILON,
            };
            if needs_emit {
                let advert = self.build_advertisement(entry.destination.clone(), entry, topology);
                plane.advertise(&advert);
                self.advertised.insert(entry.destination.clone(), entry.cost);
                report.advertised.push(entry.destination.clone());
            }
        }

        // revocations for destinations that disappeared
        let gone: Vec<String> = self
            .advertised
            .keys()
            .filter(|dest| table.get(dest).is_none())
            .cloned()
            .collect();
        for dest in gone {
            plane.revoke(&dest);
            self.advertised.remove(&dest);
            report.revoked.push(dest);
        }

        // tunnel recommendations for next hops in use
        let used = table.next_hops();
        for hop in &used {
            if let Some(streak) = self.tunnels.get_mut(hop) {
                *streak = 0;
                continue;
            }
            let Some(edge) = topology.edge(&self.local_id, hop) else {
                continue;
            };
            if edge.latency_ms >= TUNNEL_MAX_LATENCY_MS || edge.loss_ratio >= TUNNEL_MAX_LOSS {
                continue;
            }
            let Some(endpoint) = endpoints.get(hop) else {
                tracing::debug!(peer = %hop, "tunnel candidate has no known endpoint");
                continue;
            };
            plane.request_tunnel(hop, *endpoint);
            self.tunnels.insert(hop.clone(), 0);
            report.tunnels_requested.push(hop.clone());
        }

        // tear down tunnels whose hop has gone unused long enough
        let mut released = Vec::new();
        for (hop, streak) in self.tunnels.iter_mut() {
            if !used.contains(hop) {
                *streak += 1;
                if *streak >= TUNNEL_UNUSED_PASSES {
                    released.push(hop.clone());
                }
            }
        }
        for hop in released {
            plane.release_tunnel(&hop);
            self.tunnels.remove(&hop);
            report.tunnels_released.push(hop);
        }

        report
    }

    /// OWL triple for a route: aggregated along the full path. Latency and
    /// jitter add; loss compounds.
    fn build_advertisement(
        &self,
        destination: String,
        entry: &crate::routing::RouteEntry,
        topology: &TopologySnapshot,
    ) -> RouteAdvertisement {
        let mut latency_ms = 0.0;
        let mut jitter_ms = 0.0;
        let mut delivered = 1.0;
        for pair in entry.path.windows(2) {
            if let Some(edge) = topology.edge(&pair[0], &pair[1]) {
                latency_ms += edge.latency_ms;
                jitter_ms += edge.jitter_ms;
                delivered *= 1.0 - edge.loss_ratio;
            }
        }
        RouteAdvertisement {
            destination,
            next_hop: entry.next_hop.clone(),
            latency_ms,
            jitter_ms,
            loss_ratio: (1.0 - delivered).clamp(0.0, 1.0),
        }
    }
}

// ── Adapters ──────────────────────────────────────────────────────────────────

/// Logs every recommendation, communities included. Stands in for the
/// eBGP speaker and the tunnel orchestrator in single-binary deployments.
pub struct LoggingDataPlane;

impl DataPlane for LoggingDataPlane {
    fn advertise(&self, advert: &RouteAdvertisement) {
        let communities =
            owl_communities(advert.latency_ms, advert.jitter_ms, advert.loss_ratio);
        tracing::info!(
            destination = %advert.destination,
            next_hop = %advert.next_hop,
            latency_ms = advert.latency_ms,
            communities = ?communities,
            "advertise route"
        );
    }

    fn revoke(&self, destination: &str) {
        tracing::info!(%destination, "revoke route");
    }

    fn request_tunnel(&self, peer_id: &str, endpoint: SocketAddr) {
        tracing::info!(peer = %peer_id, %endpoint, "request tunnel");
    }

    fn release_tunnel(&self, peer_id: &str) {
        tracing::info!(peer = %peer_id, "release tunnel");
    }
}

/// Records every call, for assertions in tests.
#[derive(Default)]
pub struct RecordingDataPlane {
    events: Mutex<Vec<DataPlaneEvent>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DataPlaneEvent {
    Advertised(RouteAdvertisement),
    Revoked(String),
    TunnelRequested { peer_id: String, endpoint: SocketAddr },
    TunnelReleased(String),
}

impl RecordingDataPlane {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain everything recorded so far.
    pub fn take(&self) -> Vec<DataPlaneEvent> {
        std::mem::take(&mut *self.events.lock().expect("recording lock"))
    }
}

impl DataPlane for RecordingDataPlane {
    fn advertise(&self, advert: &RouteAdvertisement) {
        self.events
            .lock()
            .expect("recording lock")
            .push(DataPlaneEvent::Advertised(advert.clone()));
    }

    fn revoke(&self, destination: &str) {
        self.events
            .lock()
            .expect("recording lock")
            .push(DataPlaneEvent::Revoked(destination.to_string()));
    }

    fn request_tunnel(&self, peer_id: &str, endpoint: SocketAddr) {
        self.events
            .lock()
            .expect("recording lock")
            .push(DataPlaneEvent::TunnelRequested {
                peer_id: peer_id.to_string(),
                endpoint,
            });
    }

    fn release_tunnel(&self, peer_id: &str) {
        self.events
            .lock()
            .expect("recording lock")
            .push(DataPlaneEvent::TunnelReleased(peer_id.to_string()));
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
