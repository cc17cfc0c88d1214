//! Staleness and expiry: a silent peer ages out of routing, then out of
//! the topology, while its registry record waits for an operator.

use std::time::{Duration, Instant};

use ddarp_core::NodeKind;
use ddarp_services::peer::Liveness;
use ddarp_services::{EdgeMetrics, PeerRegistry, RoutingEngine, TopologyStore};

fn clean(latency_ms: f64) -> EdgeMetrics {
    EdgeMetrics {
        latency_ms,
        jitter_ms: 0.0,
        loss_ratio: 0.0,
    }
}

#[test]
fn silent_peer_ages_out_of_routing_then_topology() {
    let start = Instant::now();
    let topo = TopologyStore::new("a", NodeKind::Regular, start);
    let registry = PeerRegistry::new();
    let engine = RoutingEngine::new("a");

    for peer in ["b", "d"] {
        registry.add_peer(
            peer,
            "127.0.0.1:8080".parse().unwrap(),
            b"s".to_vec(),
            NodeKind::Regular,
            start,
        );
        registry.touch(peer, start);
    }
    for (src, dst) in [("a", "b"), ("b", "a"), ("a", "d"), ("d", "a")] {
        topo.upsert_edge(src, dst, clean(10.0), start, 0);
    }

    let table = engine.run_pass(&topo.graph(start), start, 0).table;
    assert!(table.get("d").is_some());

    // d goes silent; b keeps refreshing
    let t40 = start + Duration::from_secs(40);
    for (src, dst) in [("a", "b"), ("b", "a")] {
        topo.upsert_edge(src, dst, clean(10.0), t40, 0);
    }
    registry.touch("b", t40);
    registry.sweep(t40);

    // d's edges are past the 30 s freshness horizon: gone from the graph,
    // still visible in the store
    let graph = topo.graph(t40);
    assert!(graph.weight_of("a", "d").is_none());
    assert!(topo.snapshot(t40).edge("a", "d").is_some());

    let table = engine.run_pass(&graph, t40, 0).table;
    assert!(table.get("d").is_none(), "route through a stale edge survived");
    assert!(table.get("b").is_some());
    assert_eq!(registry.get("d").unwrap().liveness, Liveness::Dead);

    // past 120 s: d disappears from the topology entirely
    let t125 = start + Duration::from_secs(125);
    for (src, dst) in [("a", "b"), ("b", "a")] {
        topo.upsert_edge(src, dst, clean(10.0), t125, 0);
    }
    registry.touch("b", t125);
    topo.evict_stale(t125);

    assert!(!topo.has_node("d"));
    assert!(topo.snapshot(t125).edge("a", "d").is_none());
    assert!(engine.lookup("d", t125).is_none());

    // the peer record is an operator's problem, not the daemon's
    assert!(registry.contains("d"));
    assert_eq!(registry.needing_attention(t125), vec!["d".to_string()]);
}

#[test]
fn routes_expire_even_without_a_pass() {
    let start = Instant::now();
    let topo = TopologyStore::new("a", NodeKind::Regular, start);
    let engine = RoutingEngine::new("a");
    topo.upsert_edge("a", "b", clean(5.0), start, 0);
    engine.run_pass(&topo.graph(start), start, 0);

    assert!(engine.lookup("b", start + Duration::from_secs(119)).is_some());
    assert!(engine.lookup("b", start + Duration::from_secs(121)).is_none());
}
