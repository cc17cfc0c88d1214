//! Randomized routing properties: heap Dijkstra against a naive
//! Floyd–Warshall reference, path/cost coherence, and pass stability.

use std::collections::BTreeMap;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use ddarp_services::{GraphSnapshot, RoutingEngine};

fn node_name(i: usize) -> String {
    format!("n{i:02}")
}

/// Erdős–Rényi digraph: n ∈ [3, 30], edge probability p ∈ [0.3, 1.0],
/// weights uniform in [0.1, 100] ms.
fn random_graph(rng: &mut StdRng) -> (usize, GraphSnapshot) {
    let n = rng.gen_range(3..=30);
    let p: f64 = rng.gen_range(0.3..=1.0);

    let mut adjacency: BTreeMap<String, Vec<(String, f64)>> = BTreeMap::new();
    for i in 0..n {
        for j in 0..n {
            if i == j || rng.gen::<f64>() > p {
                continue;
            }
            let weight = rng.gen_range(0.1..=100.0);
            adjacency
                .entry(node_name(i))
                .or_default()
                .push((node_name(j), weight));
        }
    }
    for neighbors in adjacency.values_mut() {
        neighbors.sort_by(|a, b| a.0.cmp(&b.0));
    }

    (
        n,
        GraphSnapshot {
            generation: 0,
            adjacency,
        },
    )
}

fn floyd_warshall(n: usize, graph: &GraphSnapshot) -> Vec<Vec<f64>> {
    let mut dist = vec![vec![f64::INFINITY; n]; n];
    for (i, row) in dist.iter_mut().enumerate().take(n) {
        row[i] = 0.0;
    }
    for (src, neighbors) in &graph.adjacency {
        let i: usize = src[1..].parse().unwrap();
        for (dst, weight) in neighbors {
            let j: usize = dst[1..].parse().unwrap();
            dist[i][j] = dist[i][j].min(*weight);
        }
    }
    for k in 0..n {
        for i in 0..n {
            for j in 0..n {
                let via = dist[i][k] + dist[k][j];
                if via < dist[i][j] {
                    dist[i][j] = via;
                }
            }
        }
    }
    dist
}

#[test]
fn dijkstra_agrees_with_floyd_warshall() {
    for seed in 0..25u64 {
        let mut rng = StdRng::seed_from_u64(seed);
        let (n, graph) = random_graph(&mut rng);

        let engine = RoutingEngine::new(&node_name(0));
        let now = Instant::now();
        let table = engine.run_pass(&graph, now, 0).table;
        let reference = floyd_warshall(n, &graph);

        for j in 1..n {
            let dest = node_name(j);
            match table.get(&dest) {
                Some(entry) => {
                    assert!(
                        (entry.cost - reference[0][j]).abs() < 1e-6,
                        "seed {seed}: cost to {dest} is {} but reference says {}",
                        entry.cost,
                        reference[0][j]
                    );
                }
                None => {
                    assert!(
                        reference[0][j].is_infinite(),
                        "seed {seed}: {dest} reachable in reference but missing from table"
                    );
                }
            }
        }
    }
}

#[test]
fn every_route_is_internally_coherent() {
    for seed in 25..45u64 {
        let mut rng = StdRng::seed_from_u64(seed);
        let (_, graph) = random_graph(&mut rng);

        let source = node_name(0);
        let engine = RoutingEngine::new(&source);
        let table = engine.run_pass(&graph, Instant::now(), 0).table;

        for entry in table.entries() {
            assert_eq!(entry.path.first(), Some(&source), "seed {seed}");
            assert_eq!(entry.path.last(), Some(&entry.destination), "seed {seed}");
            assert_eq!(entry.next_hop, entry.path[1], "seed {seed}");

            let mut sum = 0.0;
            for pair in entry.path.windows(2) {
                let weight = graph
                    .weight_of(&pair[0], &pair[1])
                    .unwrap_or_else(|| panic!("seed {seed}: path uses missing edge"));
                sum += weight;
            }
            assert!(
                (sum - entry.cost).abs() < 1e-6,
                "seed {seed}: cost {} but edges sum to {sum}",
                entry.cost
            );
        }
    }
}

#[test]
fn repeated_passes_over_a_fixed_graph_never_flap() {
    for seed in 45..55u64 {
        let mut rng = StdRng::seed_from_u64(seed);
        let (_, graph) = random_graph(&mut rng);

        let engine = RoutingEngine::new(&node_name(0));
        let start = Instant::now();
        let first = engine.run_pass(&graph, start, 0).table;

        for tick in 1..=10u64 {
            let at = start + std::time::Duration::from_secs(tick);
            let outcome = engine.run_pass(&graph, at, 0);
            assert_eq!(outcome.changes(), 0, "seed {seed}, pass {tick}");
            for entry in outcome.table.entries() {
                let original = first.get(&entry.destination).unwrap();
                assert_eq!(entry.path, original.path, "seed {seed}");
            }
        }
    }
}
