//! Peer registry — the source of truth for who to probe.
//!
//! Shared between the admin surface (writer), the probe emitter, and the
//! inbound receiver. Reads on the probe path go through the DashMap
//! without any global lock.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;

use ddarp_core::NodeKind;

/// No authenticated receipt for this long moves a peer to Suspect.
pub const SUSPECT_AFTER: Duration = Duration::from_secs(10);

/// No authenticated receipt for this long moves a peer to Dead.
pub const DEAD_AFTER: Duration = Duration::from_secs(30);

/// A dead peer older than this requires administrative attention.
/// It is never removed automatically.
pub const ADMIN_ATTENTION_AFTER: Duration = Duration::from_secs(120);

/// Peer liveness as seen from this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Liveness {
    /// Never heard from since it was added.
    Unknown,
    Alive,
    Suspect,
    Dead,
}

/// One peer of the control mesh.
#[derive(Debug, Clone)]
pub struct PeerRecord {
    pub node_id: String,
    pub transport_address: SocketAddr,
    pub shared_secret: Vec<u8>,
    pub kind: NodeKind,
    /// Last authenticated receipt. None until the first one arrives.
    pub last_heard: Option<Instant>,
    pub liveness: Liveness,
    pub added_at: Instant,
}

impl PeerRecord {
    /// The instant liveness ages are measured from.
    fn heard_reference(&self) -> Instant {
        self.last_heard.unwrap_or(self.added_at)
    }
}

/// Outcome of an idempotent add.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Added,
    /// Same node_id already present with a different address or kind;
    /// the record was updated in place.
    Updated,
    Unchanged,
}

/// A peer eligible for probing this tick.
#[derive(Debug, Clone)]
pub struct ProbeTarget {
    pub node_id: String,
    pub address: SocketAddr,
    pub secret: Vec<u8>,
}

/// A liveness change produced by [`PeerRegistry::sweep`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LivenessTransition {
    pub node_id: String,
    pub from: Liveness,
    pub to: Liveness,
}

/// The peer registry. A NodeId is present exactly once or absent.
#[derive(Default)]
pub struct PeerRegistry {
    peers: DashMap<String, PeerRecord>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent add. Re-adding with a new address or kind updates the
    /// record in place without resetting liveness.
    pub fn add_peer(
        &self,
        node_id: &str,
        address: SocketAddr,
        secret: Vec<u8>,
        kind: NodeKind,
        now: Instant,
    ) -> UpsertOutcome {
        if let Some(mut existing) = self.peers.get_mut(node_id) {
            if existing.transport_address == address
                && existing.kind == kind
                && existing.shared_secret == secret
            {
                return UpsertOutcome::Unchanged;
            }
            existing.transport_address = address;
            existing.kind = kind;
            existing.shared_secret = secret;
            return UpsertOutcome::Updated;
        }

        self.peers.insert(
            node_id.to_string(),
            PeerRecord {
                node_id: node_id.to_string(),
                transport_address: address,
                shared_secret: secret,
                kind,
                last_heard: None,
                liveness: Liveness::Unknown,
                added_at: now,
            },
        );
        UpsertOutcome::Added
    }

    /// Remove a peer. Returns false when it was absent.
    pub fn remove_peer(&self, node_id: &str) -> bool {
        self.peers.remove(node_id).is_some()
    }

    /// Snapshot of every record, for the admin surface.
    pub fn list_peers(&self) -> Vec<PeerRecord> {
        let mut peers: Vec<_> = self.peers.iter().map(|e| e.value().clone()).collect();
        peers.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        peers
    }

    pub fn get(&self, node_id: &str) -> Option<PeerRecord> {
        self.peers.get(node_id).map(|e| e.value().clone())
    }

    pub fn secret_for(&self, node_id: &str) -> Option<Vec<u8>> {
        self.peers.get(node_id).map(|e| e.value().shared_secret.clone())
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.peers.contains_key(node_id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Record an authenticated receipt: peer becomes Alive immediately.
    /// Returns false when the peer is not registered.
    pub fn touch(&self, node_id: &str, now: Instant) -> bool {
        match self.peers.get_mut(node_id) {
            Some(mut record) => {
                record.last_heard = Some(now);
                record.liveness = Liveness::Alive;
                true
            }
            None => false,
        }
    }

    /// Peers probed this tick: those in the Alive or Unknown states.
    pub fn probe_targets(&self) -> Vec<ProbeTarget> {
        self.peers
            .iter()
            .filter(|e| matches!(e.value().liveness, Liveness::Alive | Liveness::Unknown))
            .map(|e| ProbeTarget {
                node_id: e.value().node_id.clone(),
                address: e.value().transport_address,
                secret: e.value().shared_secret.clone(),
            })
            .collect()
    }

    /// Apply age-based liveness transitions and return the changes.
    ///
    /// Unknown peers age from their add time, so a peer that never answers
    /// follows the same suspect/dead path as one that went silent.
    pub fn sweep(&self, now: Instant) -> Vec<LivenessTransition> {
        let mut transitions = Vec::new();
        for mut entry in self.peers.iter_mut() {
            let record = entry.value_mut();
            let age = now.saturating_duration_since(record.heard_reference());
            let next = if age >= DEAD_AFTER {
                Liveness::Dead
            } else if age >= SUSPECT_AFTER {
                Liveness::Suspect
            } else {
                record.liveness
            };
            if next != record.liveness {
                transitions.push(LivenessTransition {
                    node_id: record.node_id.clone(),
                    from: record.liveness,
                    to: next,
                });
                record.liveness = next;
            }
        }
        transitions
    }

    /// Dead peers that have been silent long enough to need an operator.
    pub fn needing_attention(&self, now: Instant) -> Vec<String> {
        self.peers
            .iter()
            .filter(|e| {
                e.value().liveness == Liveness::Dead
                    && now.saturating_duration_since(e.value().heard_reference())
                        >= ADMIN_ATTENTION_AFTER
            })
            .map(|e| e.key().clone())
            .collect()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
