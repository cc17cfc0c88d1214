//! Topology store — the directed weighted graph of the mesh.
//!
//! Nodes and edges live under one lock so every reader sees a consistent
//! snapshot. Writers are the inbound receive task (measurements, gossip)
//! and the admin surface (node add/remove); the routing engine and the
//! HTTP surface only ever read snapshots.
//!
//! Every structural change bumps the generation counter and pokes the
//! dirty notifier so the routing loop can recompute without polling.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::Notify;

use crate::owl::EdgeMetrics;
use ddarp_core::NodeKind;

/// Edges older than this are excluded from path computation.
pub const EDGE_FRESH_FOR: Duration = Duration::from_secs(30);

/// Edges older than this are evicted from the store entirely.
pub const EDGE_RETAINED_FOR: Duration = Duration::from_secs(120);

/// Nodes not seen for this long are evicted (the local node never is).
pub const NODE_RETAINED_FOR: Duration = Duration::from_secs(120);

/// Above this loss ratio an edge is unusable for routing but is kept
/// around for observability until it ages out.
pub const MAX_USABLE_LOSS: f64 = 0.5;

// Weight changes smaller than this do not count as structural.
const WEIGHT_DELTA: f64 = 0.1;

/// Path weight of an edge: latency plus 10 ms penalty per 1% loss.
pub fn edge_weight(metrics: &EdgeMetrics) -> f64 {
    metrics.latency_ms + 10.0 * metrics.loss_ratio * 100.0
}

#[derive(Debug, Clone)]
pub struct NodeEntry {
    pub node_id: String,
    pub kind: NodeKind,
    pub last_seen: Instant,
}

#[derive(Debug, Clone)]
pub struct EdgeEntry {
    pub metrics: EdgeMetrics,
    pub last_updated: Instant,
    /// Wall-clock shadow of `last_updated`, for the HTTP surface.
    pub last_updated_unix: u64,
}

#[derive(Default)]
struct Inner {
    nodes: HashMap<String, NodeEntry>,
    edges: HashMap<(String, String), EdgeEntry>,
}

pub struct TopologyStore {
    local_id: String,
    inner: RwLock<Inner>,
    generation: AtomicU64,
    dirty: Notify,
}

impl TopologyStore {
    pub fn new(local_id: &str, kind: NodeKind, now: Instant) -> Self {
        let store = Self {
            local_id: local_id.to_string(),
            inner: RwLock::new(Inner::default()),
            generation: AtomicU64::new(0),
            dirty: Notify::new(),
        };
        store
            .inner
            .write()
            .expect("topology lock")
            .nodes
            .insert(
                local_id.to_string(),
                NodeEntry {
                    node_id: local_id.to_string(),
                    kind,
                    last_seen: now,
                },
            );
        store
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Woken on every generation bump.
    pub fn dirty(&self) -> &Notify {
        &self.dirty
    }

    fn bump(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.dirty.notify_one();
    }

    pub fn has_node(&self, node_id: &str) -> bool {
        self.inner.read().expect("topology lock").nodes.contains_key(node_id)
    }

    pub fn upsert_node(&self, node_id: &str, kind: NodeKind, now: Instant) {
        let mut inner = self.inner.write().expect("topology lock");
        if let Some(node) = inner.nodes.get_mut(node_id) {
            node.last_seen = now;
            node.kind = kind;
            return;
        }
        inner.nodes.insert(
            node_id.to_string(),
            NodeEntry {
                node_id: node_id.to_string(),
                kind,
                last_seen: now,
            },
        );
        drop(inner);
        self.bump();
    }

    /// Remove a node and every incident edge.
    pub fn remove_node(&self, node_id: &str) -> bool {
        let mut inner = self.inner.write().expect("topology lock");
        let existed = inner.nodes.remove(node_id).is_some();
        let before = inner.edges.len();
        inner
            .edges
            .retain(|(src, dst), _| src != node_id && dst != node_id);
        let touched = existed || inner.edges.len() != before;
        drop(inner);
        if touched {
            self.bump();
        }
        touched
    }

    /// Insert or refresh a directed edge. Both endpoints are kept alive as
    /// nodes; unknown endpoints are created as regular nodes.
    pub fn upsert_edge(
        &self,
        src: &str,
        dst: &str,
        metrics: EdgeMetrics,
        last_updated: Instant,
        last_updated_unix: u64,
    ) {
        let mut inner = self.inner.write().expect("topology lock");

        for id in [src, dst] {
            inner
                .nodes
                .entry(id.to_string())
                .and_modify(|n| {
                    if last_updated > n.last_seen {
                        n.last_seen = last_updated;
                    }
                })
                .or_insert_with(|| NodeEntry {
                    node_id: id.to_string(),
                    kind: NodeKind::Regular,
                    last_seen: last_updated,
                });
        }

        let key = (src.to_string(), dst.to_string());
        let structural = match inner.edges.get(&key) {
            Some(existing) => {
                (edge_weight(&existing.metrics) - edge_weight(&metrics)).abs() > WEIGHT_DELTA
            }
            None => true,
        };
        inner.edges.insert(
            key,
            EdgeEntry {
                metrics,
                last_updated,
                last_updated_unix,
            },
        );
        drop(inner);
        if structural {
            self.bump();
        }
    }

    /// Evict edges and nodes past their retention horizons.
    /// Returns (edges evicted, nodes evicted).
    pub fn evict_stale(&self, now: Instant) -> (usize, usize) {
        let mut inner = self.inner.write().expect("topology lock");

        let edges_before = inner.edges.len();
        inner.edges.retain(|_, edge| {
            now.saturating_duration_since(edge.last_updated) < EDGE_RETAINED_FOR
        });
        let edges_evicted = edges_before - inner.edges.len();

        let local_id = self.local_id.clone();
        let nodes_before = inner.nodes.len();
        inner.nodes.retain(|id, node| {
            *id == local_id || now.saturating_duration_since(node.last_seen) < NODE_RETAINED_FOR
        });
        let nodes_evicted = nodes_before - inner.nodes.len();

        // edges whose endpoint just went away go with it
        if nodes_evicted > 0 {
            let nodes = inner.nodes.keys().cloned().collect::<std::collections::HashSet<_>>();
            inner
                .edges
                .retain(|(src, dst), _| nodes.contains(src) && nodes.contains(dst));
        }

        drop(inner);
        if edges_evicted + nodes_evicted > 0 {
            self.bump();
        }
        (edges_evicted, nodes_evicted)
    }

    pub fn border_nodes(&self) -> Vec<String> {
        let inner = self.inner.read().expect("topology lock");
        let mut ids: Vec<_> = inner
            .nodes
            .values()
            .filter(|n| n.kind == NodeKind::Border)
            .map(|n| n.node_id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Pruned adjacency for one routing pass: only fresh, usable edges.
    pub fn graph(&self, now: Instant) -> GraphSnapshot {
        let inner = self.inner.read().expect("topology lock");
        let mut adjacency: BTreeMap<String, Vec<(String, f64)>> = BTreeMap::new();
        for ((src, dst), edge) in &inner.edges {
            if now.saturating_duration_since(edge.last_updated) >= EDGE_FRESH_FOR {
                continue;
            }
            if edge.metrics.loss_ratio > MAX_USABLE_LOSS {
                continue;
            }
            adjacency
                .entry(src.clone())
                .or_default()
                .push((dst.clone(), edge_weight(&edge.metrics)));
        }
        for neighbors in adjacency.values_mut() {
            neighbors.sort_by(|a, b| a.0.cmp(&b.0));
        }
        GraphSnapshot {
            generation: self.generation(),
            adjacency,
        }
    }

    /// Full read-only view for the admin surface.
    pub fn snapshot(&self, now: Instant) -> TopologySnapshot {
        let inner = self.inner.read().expect("topology lock");

        let mut nodes: Vec<_> = inner
            .nodes
            .values()
            .map(|n| NodeView {
                node_id: n.node_id.clone(),
                kind: n.kind,
                last_seen_age_s: now.saturating_duration_since(n.last_seen).as_secs(),
            })
            .collect();
        nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));

        let mut edges: Vec<_> = inner
            .edges
            .iter()
            .map(|((src, dst), edge)| {
                let age = now.saturating_duration_since(edge.last_updated);
                EdgeView {
                    src: src.clone(),
                    dst: dst.clone(),
                    weight: edge_weight(&edge.metrics),
                    latency_ms: edge.metrics.latency_ms,
                    jitter_ms: edge.metrics.jitter_ms,
                    loss_ratio: edge.metrics.loss_ratio,
                    last_updated: edge.last_updated_unix,
                    usable: age < EDGE_FRESH_FOR && edge.metrics.loss_ratio <= MAX_USABLE_LOSS,
                }
            })
            .collect();
        edges.sort_by(|a, b| (&a.src, &a.dst).cmp(&(&b.src, &b.dst)));

        TopologySnapshot {
            generation: self.generation(),
            nodes,
            edges,
        }
    }
}

// ── Snapshots ─────────────────────────────────────────────────────────────────

/// Pruned edge set handed to one Dijkstra pass.
#[derive(Debug, Clone)]
pub struct GraphSnapshot {
    pub generation: u64,
    /// src → sorted (dst, weight) pairs. Only fresh, usable edges.
    pub adjacency: BTreeMap<String, Vec<(String, f64)>>,
}

impl GraphSnapshot {
    pub fn edge_count(&self) -> usize {
        self.adjacency.values().map(Vec::len).sum()
    }

    pub fn weight_of(&self, src: &str, dst: &str) -> Option<f64> {
        self.adjacency
            .get(src)?
            .iter()
            .find(|(d, _)| d == dst)
            .map(|(_, w)| *w)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeView {
    pub node_id: String,
    pub kind: NodeKind,
    pub last_seen_age_s: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct EdgeView {
    pub src: String,
    pub dst: String,
    pub weight: f64,
    pub latency_ms: f64,
    pub jitter_ms: f64,
    pub loss_ratio: f64,
    pub last_updated: u64,
    pub usable: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TopologySnapshot {
    pub generation: u64,
    pub nodes: Vec<NodeView>,
    pub edges: Vec<EdgeView>,
}

impl TopologySnapshot {
    pub fn edge(&self, src: &str, dst: &str) -> Option<&EdgeView> {
        self.edges.iter().find(|e| e.src == src && e.dst == dst)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
