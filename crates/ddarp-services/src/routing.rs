//! Routing engine — dampened Dijkstra over the pruned topology.
//!
//! Each pass computes shortest paths from the local node with a binary
//! heap, then installs the result over the previous table with hysteresis:
//! an existing route survives unless it vanished, its first hop is no
//! longer usable, the fresh path is a strict 20% improvement, or the entry
//! is due for a freshness refresh. The finished table is swapped in
//! wholesale; readers always see either the old or the new table.
//!
//! Equal-cost paths prefer the lexicographically smaller next hop, which
//! keeps successive passes byte-identical when nothing material changed.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::topology::GraphSnapshot;

/// Entries older than this are replaced on the next pass even when the
/// fresh result is identical, so their freshness never decays silently.
pub const ROUTE_REFRESH_AFTER: Duration = Duration::from_secs(30);

/// Entries older than this are dropped outright.
pub const ROUTE_EXPIRE_AFTER: Duration = Duration::from_secs(120);

/// A fresh path must be strictly better than this fraction of the current
/// cost to displace it early.
pub const IMPROVEMENT_RATIO: f64 = 0.80;

const COST_EPSILON: f64 = 1e-9;

/// One installed route.
#[derive(Debug, Clone, Serialize)]
pub struct RouteEntry {
    pub destination: String,
    pub next_hop: String,
    /// Full path, local node first, destination last.
    pub path: Vec<String>,
    pub cost: f64,
    #[serde(skip)]
    pub computed_at: Instant,
    /// Wall-clock shadow of `computed_at`.
    pub computed_unix: u64,
}

/// destination → route, replaced wholesale at the end of each pass.
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    entries: BTreeMap<String, RouteEntry>,
}

impl RoutingTable {
    pub fn get(&self, destination: &str) -> Option<&RouteEntry> {
        self.entries.get(destination)
    }

    pub fn entries(&self) -> impl Iterator<Item = &RouteEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every next hop any current route uses.
    pub fn next_hops(&self) -> BTreeSet<String> {
        self.entries.values().map(|e| e.next_hop.clone()).collect()
    }
}

/// What one pass did to the table.
#[derive(Debug)]
pub struct PassOutcome {
    pub table: Arc<RoutingTable>,
    pub installed: usize,
    pub replaced: usize,
    pub refreshed: usize,
    pub retained: usize,
    pub evicted: usize,
}

impl PassOutcome {
    /// Installs, replacements, and evictions — everything that altered the
    /// table beyond a freshness refresh.
    pub fn changes(&self) -> u64 {
        (self.installed + self.replaced + self.evicted) as u64
    }
}

pub struct RoutingEngine {
    local_id: String,
    table: RwLock<Arc<RoutingTable>>,
}

impl RoutingEngine {
    pub fn new(local_id: &str) -> Self {
        Self {
            local_id: local_id.to_string(),
            table: RwLock::new(Arc::new(RoutingTable::default())),
        }
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    /// Current table snapshot. Cheap: clones an Arc.
    pub fn table(&self) -> Arc<RoutingTable> {
        self.table.read().expect("routing table lock").clone()
    }

    /// Route to `destination`, ignoring entries past expiry.
    pub fn lookup(&self, destination: &str, now: Instant) -> Option<RouteEntry> {
        self.table()
            .get(destination)
            .filter(|e| now.saturating_duration_since(e.computed_at) < ROUTE_EXPIRE_AFTER)
            .cloned()
    }

    /// Run one full pass over `graph` and swap the result in.
    pub fn run_pass(&self, graph: &GraphSnapshot, now: Instant, unix_now: u64) -> PassOutcome {
        let fresh = shortest_paths(graph, &self.local_id);
        let current = self.table();

        let mut next = BTreeMap::new();
        let mut installed = 0usize;
        let mut replaced = 0usize;
        let mut refreshed = 0usize;
        let mut retained = 0usize;

        for (destination, found) in fresh {
            let entry = RouteEntry {
                destination: destination.clone(),
                next_hop: found.next_hop,
                path: found.path,
                cost: found.cost,
                computed_at: now,
                computed_unix: unix_now,
            };

            match current.get(&destination) {
                None => {
                    installed += 1;
                    next.insert(destination, entry);
                }
                Some(existing) => {
                    let age = now.saturating_duration_since(existing.computed_at);
                    let first_hop_usable =
                        graph.weight_of(&self.local_id, &existing.next_hop).is_some();
                    let strictly_better =
                        entry.cost < IMPROVEMENT_RATIO * existing.cost - COST_EPSILON;

                    if age >= ROUTE_EXPIRE_AFTER || !first_hop_usable || strictly_better {
                        replaced += 1;
                        next.insert(destination, entry);
                    } else if age >= ROUTE_REFRESH_AFTER {
                        if entry.path == existing.path {
                            refreshed += 1;
                        } else {
                            replaced += 1;
                        }
                        next.insert(destination, entry);
                    } else {
                        retained += 1;
                        next.insert(destination, existing.clone());
                    }
                }
            }
        }

        let evicted = current
            .entries()
            .filter(|e| !next.contains_key(&e.destination))
            .count();

        let table = Arc::new(RoutingTable { entries: next });
        *self.table.write().expect("routing table lock") = table.clone();

        PassOutcome {
            table,
            installed,
            replaced,
            refreshed,
            retained,
            evicted,
        }
    }
}

// ── Dijkstra ──────────────────────────────────────────────────────────────────

struct FoundPath {
    next_hop: String,
    path: Vec<String>,
    cost: f64,
}

struct Settled {
    cost: f64,
    next_hop: String,
    prev: String,
}

/// Heap candidate. Min-ordered by (cost, next_hop, node) so that among
/// equal-cost paths the lexicographically smaller next hop settles first.
struct Candidate {
    cost: f64,
    next_hop: String,
    node: String,
    prev: String,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}
impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // inverted: BinaryHeap is a max-heap, we want the cheapest on top
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.next_hop.cmp(&self.next_hop))
            .then_with(|| other.node.cmp(&self.node))
    }
}

/// Single-source shortest paths over the pruned adjacency.
fn shortest_paths(graph: &GraphSnapshot, source: &str) -> BTreeMap<String, FoundPath> {
    let mut settled: HashMap<String, Settled> = HashMap::new();
    let mut heap = BinaryHeap::new();

    heap.push(Candidate {
        cost: 0.0,
        next_hop: String::new(),
        node: source.to_string(),
        prev: String::new(),
    });

    while let Some(candidate) = heap.pop() {
        if settled.contains_key(&candidate.node) {
            continue;
        }
        let node = candidate.node.clone();
        settled.insert(
            node.clone(),
            Settled {
                cost: candidate.cost,
                next_hop: candidate.next_hop.clone(),
                prev: candidate.prev,
            },
        );

        if let Some(neighbors) = graph.adjacency.get(&node) {
            for (dst, weight) in neighbors {
                if settled.contains_key(dst) {
                    continue;
                }
                let next_hop = if node == source {
                    dst.clone()
                } else {
                    candidate.next_hop.clone()
                };
                heap.push(Candidate {
                    cost: candidate.cost + weight,
                    next_hop,
                    node: dst.clone(),
                    prev: node.clone(),
                });
            }
        }
    }

    let mut found = BTreeMap::new();
    for (node, state) in &settled {
        if node == source {
            continue;
        }
        let mut path = vec![node.clone()];
        let mut cursor = state;
        while !cursor.prev.is_empty() {
            path.push(cursor.prev.clone());
            cursor = &settled[&cursor.prev];
        }
        path.reverse();
        found.insert(
            node.clone(),
            FoundPath {
                next_hop: state.next_hop.clone(),
                path,
                cost: state.cost,
            },
        );
    }
    found
}

// ── Tests ─────────────────────────────────────────────────────────────────────
