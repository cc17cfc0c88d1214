//! Probe emission, gossip, and the inbound datagram path.
//!
//! The receive path never lets a wire or auth error escape: every failure
//! becomes a counter increment and a log line, and the next datagram is
//! processed as if nothing happened.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::Result;
use tokio::net::UdpSocket;
use tokio::sync::watch;

use ddarp_core::auth::{self, AuthError};
use ddarp_core::codec::{decode, Packet};
use ddarp_core::tlv::{GossipEdge, TopologyGossip};
use ddarp_core::wire::MAX_DATAGRAM;
use ddarp_core::{ProbeBody, TlvValue, WireError};
use ddarp_services::owl::ProbeSample;
use ddarp_services::{EdgeMetrics, NodeMetrics, OwlStore, PeerRegistry, TopologyStore};

/// Gossip cadence for locally measured edges.
pub const GOSSIP_INTERVAL: Duration = Duration::from_secs(5);

/// Idle receive timeout; purely a liveness bound on the socket wait.
const RECV_IDLE: Duration = Duration::from_secs(5);

/// Bound on a single datagram send.
const SEND_TIMEOUT: Duration = Duration::from_secs(1);

pub fn unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

pub fn wall_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}

// ── Outbound ──────────────────────────────────────────────────────────────────

/// Build one sealed probe datagram for `dst`.
pub fn build_probe(
    local_id: &str,
    dst: &str,
    seq: u32,
    mono_epoch: Instant,
    secret: &[u8],
) -> Result<Vec<u8>, WireError> {
    let body = ProbeBody {
        src: local_id.to_string(),
        dst: dst.to_string(),
        seq,
        send_ts_mono_ns: mono_epoch.elapsed().as_nanos() as u64,
        send_ts_wall_ns: wall_ns(),
    };
    let packet = Packet::request(0, seq, unix_secs() as u32, vec![TlvValue::OwlProbe(body)]);
    Ok(auth::seal(&packet.encode()?, secret))
}

/// Build the unsealed gossip packet carrying every locally measured edge,
/// or None when there is nothing to share yet.
pub fn build_gossip(local_id: &str, owl: &OwlStore, now: Instant) -> Result<Option<Vec<u8>>, WireError> {
    let edges: Vec<GossipEdge> = owl
        .local_edges()
        .into_iter()
        .map(|edge| GossipEdge {
            src: edge.src,
            dst: edge.dst,
            latency_ms: edge.metrics.latency_ms,
            jitter_ms: edge.metrics.jitter_ms,
            loss_ratio: edge.metrics.loss_ratio,
            age_ms: now.saturating_duration_since(edge.last_received).as_millis() as u64,
        })
        .collect();
    if edges.is_empty() {
        return Ok(None);
    }

    let gossip = TopologyGossip {
        origin: local_id.to_string(),
        edges,
    };
    let value = serde_json::to_value(&gossip).map_err(|e| WireError::BadJson {
        tlv_type: 0x0011,
        reason: e.to_string(),
    })?;
    let packet = Packet::request(0, 0, unix_secs() as u32, vec![TlvValue::TopologyUpdate(value)]);
    packet.encode().map(Some)
}

/// Emit one probe per alive/unknown peer every probe interval.
pub async fn send_loop(
    socket: Arc<UdpSocket>,
    registry: Arc<PeerRegistry>,
    metrics: Arc<NodeMetrics>,
    local_id: String,
    probe_interval: Duration,
    mono_epoch: Instant,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let mut interval = tokio::time::interval(probe_interval);
    let mut sequences: HashMap<String, u32> = HashMap::new();

    loop {
        tokio::select! {
            _ = shutdown.changed() => return Ok(()),
            _ = interval.tick() => {}
        }

        for target in registry.probe_targets() {
            let seq = sequences.entry(target.node_id.clone()).or_insert(0);
            let datagram =
                match build_probe(&local_id, &target.node_id, *seq, mono_epoch, &target.secret) {
                    Ok(d) => d,
                    Err(e) => {
                        tracing::warn!(peer = %target.node_id, error = %e, "failed to build probe");
                        continue;
                    }
                };
            *seq = seq.wrapping_add(1);

            match tokio::time::timeout(SEND_TIMEOUT, socket.send_to(&datagram, target.address))
                .await
            {
                Ok(Ok(_)) => {
                    metrics
                        .probe_sent
                        .with_label_values(&[target.node_id.as_str()])
                        .inc();
                }
                Ok(Err(e)) => {
                    // transient; the next tick retries
                    tracing::warn!(peer = %target.node_id, error = %e, "probe send failed");
                }
                Err(_) => {
                    tracing::warn!(peer = %target.node_id, "probe send timed out");
                }
            }
        }
    }
}

/// Share locally measured edges with every probe-eligible peer.
pub async fn gossip_loop(
    socket: Arc<UdpSocket>,
    registry: Arc<PeerRegistry>,
    owl: Arc<OwlStore>,
    local_id: String,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let mut interval = tokio::time::interval(GOSSIP_INTERVAL);

    loop {
        tokio::select! {
            _ = shutdown.changed() => return Ok(()),
            _ = interval.tick() => {}
        }

        let packet = match build_gossip(&local_id, &owl, Instant::now()) {
            Ok(Some(p)) => p,
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!(error = %e, "failed to build gossip");
                continue;
            }
        };

        for target in registry.probe_targets() {
            let datagram = auth::seal(&packet, &target.secret);
            if let Ok(Err(e)) =
                tokio::time::timeout(SEND_TIMEOUT, socket.send_to(&datagram, target.address)).await
            {
                tracing::debug!(peer = %target.node_id, error = %e, "gossip send failed");
            }
        }
    }
}

// ── Inbound ───────────────────────────────────────────────────────────────────

/// What a single datagram turned into. Observability only; errors have
/// already been counted by the time this is returned.
#[derive(Debug, PartialEq, Eq)]
pub enum RxOutcome {
    /// Authenticated probe from this peer.
    Probe(String),
    /// Authenticated topology gossip from this peer.
    Gossip(String),
    AuthFailed,
    DecodeFailed,
    /// Valid packet the daemon has no use for (keepalives, misdeliveries).
    Ignored,
}

/// The inbound datagram handler, shared by the receive loop and tests.
pub struct Receiver {
    pub local_id: String,
    pub registry: Arc<PeerRegistry>,
    pub owl: Arc<OwlStore>,
    pub topology: Arc<TopologyStore>,
    pub metrics: Arc<NodeMetrics>,
}

impl Receiver {
    pub fn handle_datagram(&self, datagram: &[u8]) -> RxOutcome {
        if datagram.len() > MAX_DATAGRAM {
            self.count_decode_error(&WireError::PacketTooLarge(datagram.len()));
            return RxOutcome::DecodeFailed;
        }

        let decoded = match decode(datagram, false) {
            Ok(d) => d,
            Err(e) => {
                self.count_decode_error(&e);
                return RxOutcome::DecodeFailed;
            }
        };

        if decoded.skipped_unknown > 0 {
            tracing::trace!(count = decoded.skipped_unknown, "skipped unknown TLVs");
        }

        // identify the claimed sender before anything else; the claim is
        // only believed once the tag verifies under that peer's secret
        let claim = decoded.packet.tlvs.iter().find_map(|tlv| match tlv {
            TlvValue::OwlProbe(body) => Some(Claim::Probe(body.clone())),
            TlvValue::TopologyUpdate(value) => {
                serde_json::from_value::<TopologyGossip>(value.clone())
                    .ok()
                    .map(Claim::Gossip)
            }
            _ => None,
        });
        let Some(claim) = claim else {
            tracing::trace!("datagram carries no probe or gossip, ignoring");
            return RxOutcome::Ignored;
        };
        let claimed_id = claim.origin().to_string();

        let Some(secret) = self.registry.secret_for(&claimed_id) else {
            // unknown peer: counted with the claimed identity as the label
            self.count_auth_fail(&claimed_id);
            tracing::debug!(peer = %claimed_id, "datagram from unknown peer");
            return RxOutcome::AuthFailed;
        };

        if let Err(e) = auth::verify(datagram, decoded.consumed, &secret) {
            self.count_auth_fail(&claimed_id);
            match e {
                AuthError::HmacMismatch => {
                    tracing::debug!(peer = %claimed_id, "authentication tag mismatch")
                }
                AuthError::MissingTag(len) => {
                    tracing::debug!(peer = %claimed_id, len, "datagram too short for its tag")
                }
            }
            return RxOutcome::AuthFailed;
        }

        let now = Instant::now();
        self.registry.touch(&claimed_id, now);

        match claim {
            Claim::Probe(body) => self.accept_probe(claimed_id, body, now),
            Claim::Gossip(gossip) => self.accept_gossip(gossip, now),
        }
    }

    fn accept_probe(&self, src: String, body: ProbeBody, now: Instant) -> RxOutcome {
        if body.dst != self.local_id {
            tracing::debug!(peer = %src, dst = %body.dst, "probe addressed to someone else");
            return RxOutcome::Ignored;
        }

        self.metrics
            .probe_recv
            .with_label_values(&[src.as_str()])
            .inc();

        let latency_ms = (wall_ns() as i128 - body.send_ts_wall_ns as i128) as f64 / 1e6;
        let sample = ProbeSample {
            seq: body.seq,
            latency_ms,
            received_at: now,
        };
        if let Some(derived) = self.owl.record(&src, &self.local_id, sample) {
            self.topology
                .upsert_edge(&src, &self.local_id, derived, now, unix_secs());
        }
        RxOutcome::Probe(src)
    }

    fn accept_gossip(&self, gossip: TopologyGossip, now: Instant) -> RxOutcome {
        let unix = unix_secs();
        for edge in &gossip.edges {
            // a node may only vouch for edges it measured itself,
            // which are exactly the edges pointing at it
            if edge.dst != gossip.origin {
                tracing::debug!(
                    origin = %gossip.origin,
                    src = %edge.src,
                    dst = %edge.dst,
                    "gossiped edge not measured by its origin, dropped"
                );
                continue;
            }
            // note: edges with src == local_id are welcome; gossip is the
            // only way this node learns the quality of its outgoing edges
            let age = Duration::from_millis(edge.age_ms);
            let metrics = EdgeMetrics {
                latency_ms: edge.latency_ms,
                jitter_ms: edge.jitter_ms,
                loss_ratio: edge.loss_ratio,
            };
            self.topology.upsert_edge(
                &edge.src,
                &edge.dst,
                metrics,
                now.checked_sub(age).unwrap_or(now),
                unix.saturating_sub(age.as_secs()),
            );
        }
        RxOutcome::Gossip(gossip.origin)
    }

    fn count_decode_error(&self, error: &WireError) {
        self.metrics
            .decode_errors
            .with_label_values(&[error.kind()])
            .inc();
        tracing::debug!(error = %error, "datagram decode failed");
    }

    fn count_auth_fail(&self, peer: &str) {
        self.metrics
            .probe_auth_fail
            .with_label_values(&[peer])
            .inc();
    }
}

enum Claim {
    Probe(ProbeBody),
    Gossip(TopologyGossip),
}

impl Claim {
    fn origin(&self) -> &str {
        match self {
            Claim::Probe(body) => &body.src,
            Claim::Gossip(gossip) => &gossip.origin,
        }
    }
}

/// Drain the probe socket until shutdown.
pub async fn recv_loop(
    socket: Arc<UdpSocket>,
    receiver: Receiver,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let mut buf = vec![0u8; MAX_DATAGRAM + 1];

    loop {
        tokio::select! {
            _ = shutdown.changed() => return Ok(()),
            result = tokio::time::timeout(RECV_IDLE, socket.recv_from(&mut buf)) => {
                match result {
                    Ok(Ok((len, _addr))) => {
                        receiver.handle_datagram(&buf[..len]);
                    }
                    Ok(Err(e)) => {
                        tracing::warn!(error = %e, "recv_from failed");
                    }
                    // idle: nothing arrived within the bound, go around
                    Err(_) => {}
                }
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use ddarp_core::NodeKind;

    fn receiver_for(local_id: &str) -> Receiver {
        Receiver {
            local_id: local_id.to_string(),
            registry: Arc::new(PeerRegistry::new()),
            owl: Arc::new(OwlStore::new()),
            topology: Arc::new(TopologyStore::new(local_id, NodeKind::Regular, Instant::now())),
            metrics: Arc::new(NodeMetrics::new().unwrap()),
        }
    }

    fn register(rx: &Receiver, peer: &str, secret: &[u8]) {
        rx.registry.add_peer(
            peer,
            "127.0.0.1:9999".parse().unwrap(),
            secret.to_vec(),
            NodeKind::Regular,
            Instant::now(),
        );
    }

    #[test]
    fn authenticated_probe_is_accepted_and_measured() {
        let rx = receiver_for("b");
        register(&rx, "a", b"secret");
        let epoch = Instant::now();

        for seq in 0..3 {
            let datagram = build_probe("a", "b", seq, epoch, b"secret").unwrap();
            assert_eq!(rx.handle_datagram(&datagram), RxOutcome::Probe("a".to_string()));
        }

        // three samples: the edge (a → b) exists now
        assert_eq!(rx.owl.window_len("a", "b"), 3);
        assert!(rx.topology.snapshot(Instant::now()).edge("a", "b").is_some());
        assert!(rx.registry.get("a").unwrap().last_heard.is_some());
    }

    #[test]
    fn bad_tag_is_dropped_before_processing() {
        let rx = receiver_for("b");
        register(&rx, "a", b"secret");

        let datagram = build_probe("a", "b", 0, Instant::now(), b"wrong-secret").unwrap();
        assert_eq!(rx.handle_datagram(&datagram), RxOutcome::AuthFailed);
        assert_eq!(rx.owl.window_len("a", "b"), 0);
        assert!(rx.registry.get("a").unwrap().last_heard.is_none());
    }

    #[test]
    fn unknown_peer_is_an_auth_failure() {
        let rx = receiver_for("b");
        let datagram = build_probe("stranger", "b", 0, Instant::now(), b"whatever").unwrap();
        assert_eq!(rx.handle_datagram(&datagram), RxOutcome::AuthFailed);
    }

    #[test]
    fn probe_for_someone_else_is_ignored() {
        let rx = receiver_for("b");
        register(&rx, "a", b"secret");
        let datagram = build_probe("a", "c", 0, Instant::now(), b"secret").unwrap();
        assert_eq!(rx.handle_datagram(&datagram), RxOutcome::Ignored);
        assert_eq!(rx.owl.window_len("a", "b"), 0);
    }

    #[test]
    fn garbage_is_a_counted_decode_error() {
        let rx = receiver_for("b");
        assert_eq!(rx.handle_datagram(&[0xff; 40]), RxOutcome::DecodeFailed);
        // and the next datagram still works
        register(&rx, "a", b"secret");
        let datagram = build_probe("a", "b", 0, Instant::now(), b"secret").unwrap();
        assert_eq!(rx.handle_datagram(&datagram), RxOutcome::Probe("a".to_string()));
    }

    #[test]
    fn gossip_installs_remote_edges() {
        let rx = receiver_for("c");
        register(&rx, "b", b"bs");

        // "b" gossips the edge it measured: a → b
        let gossip = TopologyGossip {
            origin: "b".to_string(),
            edges: vec![
                GossipEdge {
                    src: "a".to_string(),
                    dst: "b".to_string(),
                    latency_ms: 12.0,
                    jitter_ms: 0.4,
                    loss_ratio: 0.0,
                    age_ms: 1000,
                },
                // forged: b may not vouch for an edge into a
                GossipEdge {
                    src: "c".to_string(),
                    dst: "a".to_string(),
                    latency_ms: 1.0,
                    jitter_ms: 0.0,
                    loss_ratio: 0.0,
                    age_ms: 0,
                },
            ],
        };
        let value = serde_json::to_value(&gossip).unwrap();
        let packet = Packet::request(0, 0, 0, vec![TlvValue::TopologyUpdate(value)])
            .encode()
            .unwrap();
        let datagram = auth::seal(&packet, b"bs");

        assert_eq!(rx.handle_datagram(&datagram), RxOutcome::Gossip("b".to_string()));
        let snapshot = rx.topology.snapshot(Instant::now());
        assert!(snapshot.edge("a", "b").is_some());
        assert!(snapshot.edge("c", "a").is_none());
    }

    #[test]
    fn gossip_from_unregistered_origin_is_rejected() {
        let rx = receiver_for("c");
        let gossip = TopologyGossip {
            origin: "b".to_string(),
            edges: vec![],
        };
        let value = serde_json::to_value(&gossip).unwrap();
        let packet = Packet::request(0, 0, 0, vec![TlvValue::TopologyUpdate(value)])
            .encode()
            .unwrap();
        let datagram = auth::seal(&packet, b"bs");
        assert_eq!(rx.handle_datagram(&datagram), RxOutcome::AuthFailed);
    }

    #[test]
    fn keepalive_is_ignored_quietly() {
        let rx = receiver_for("b");
        let packet = Packet::request(0, 0, 0, vec![TlvValue::Keepalive])
            .encode()
            .unwrap();
        assert_eq!(rx.handle_datagram(&packet), RxOutcome::Ignored);
    }
}
