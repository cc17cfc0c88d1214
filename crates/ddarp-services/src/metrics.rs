//! Prometheus metrics. The metric names are operator-facing contracts;
//! storage stays in the typed stores and is translated here on scrape.

use prometheus::{
    Encoder, GaugeVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
    TextEncoder,
};

use crate::owl::OwlStore;
use crate::topology::TopologySnapshot;

pub struct NodeMetrics {
    registry: Registry,

    pub peer_count: IntGauge,
    pub topology_nodes: IntGauge,
    pub topology_edges: IntGauge,
    pub routing_table_size: IntGauge,
    pub node_health: IntGaugeVec,
    pub owl_latency_ms: GaugeVec,
    pub owl_jitter_ms: GaugeVec,
    pub owl_packet_loss_percent: GaugeVec,
    pub owl_clock_skew_ms: GaugeVec,

    pub probe_sent: IntCounterVec,
    pub probe_recv: IntCounterVec,
    pub probe_auth_fail: IntCounterVec,
    pub route_changes: IntCounter,
    pub decode_errors: IntCounterVec,
}

impl NodeMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let peer_count = IntGauge::new("ddarp_peer_count", "Registered peers")?;
        registry.register(Box::new(peer_count.clone()))?;

        let topology_nodes =
            IntGauge::new("ddarp_topology_nodes_total", "Nodes in the topology store")?;
        registry.register(Box::new(topology_nodes.clone()))?;

        let topology_edges =
            IntGauge::new("ddarp_topology_edges_total", "Edges in the topology store")?;
        registry.register(Box::new(topology_edges.clone()))?;

        let routing_table_size =
            IntGauge::new("ddarp_routing_table_size", "Routes in the routing table")?;
        registry.register(Box::new(routing_table_size.clone()))?;

        let node_health = IntGaugeVec::new(
            Opts::new("ddarp_node_health", "Node health (1 healthy, 0 degraded)"),
            &["node_id"],
        )?;
        registry.register(Box::new(node_health.clone()))?;

        let owl_latency_ms = GaugeVec::new(
            Opts::new("ddarp_owl_latency_ms", "One-way latency in milliseconds"),
            &["src", "dst"],
        )?;
        registry.register(Box::new(owl_latency_ms.clone()))?;

        let owl_jitter_ms = GaugeVec::new(
            Opts::new("ddarp_owl_jitter_ms", "One-way jitter in milliseconds"),
            &["src", "dst"],
        )?;
        registry.register(Box::new(owl_jitter_ms.clone()))?;

        let owl_packet_loss_percent = GaugeVec::new(
            Opts::new("ddarp_owl_packet_loss_percent", "Probe loss percentage"),
            &["src", "dst"],
        )?;
        registry.register(Box::new(owl_packet_loss_percent.clone()))?;

        let owl_clock_skew_ms = GaugeVec::new(
            Opts::new(
                "ddarp_owl_clock_skew_ms",
                "Magnitude of the most negative one-way sample; non-zero means skewed clocks",
            ),
            &["src", "dst"],
        )?;
        registry.register(Box::new(owl_clock_skew_ms.clone()))?;

        let probe_sent = IntCounterVec::new(
            Opts::new("ddarp_probe_sent_total", "Probes sent"),
            &["peer"],
        )?;
        registry.register(Box::new(probe_sent.clone()))?;

        let probe_recv = IntCounterVec::new(
            Opts::new("ddarp_probe_recv_total", "Authenticated probes received"),
            &["peer"],
        )?;
        registry.register(Box::new(probe_recv.clone()))?;

        let probe_auth_fail = IntCounterVec::new(
            Opts::new("ddarp_probe_auth_fail_total", "Probes dropped for bad auth"),
            &["peer"],
        )?;
        registry.register(Box::new(probe_auth_fail.clone()))?;

        let route_changes =
            IntCounter::new("ddarp_route_changes_total", "Routing table changes")?;
        registry.register(Box::new(route_changes.clone()))?;

        let decode_errors = IntCounterVec::new(
            Opts::new("ddarp_packet_decode_errors_total", "Packet decode errors"),
            &["kind"],
        )?;
        registry.register(Box::new(decode_errors.clone()))?;

        Ok(Self {
            registry,
            peer_count,
            topology_nodes,
            topology_edges,
            routing_table_size,
            node_health,
            owl_latency_ms,
            owl_jitter_ms,
            owl_packet_loss_percent,
            owl_clock_skew_ms,
            probe_sent,
            probe_recv,
            probe_auth_fail,
            route_changes,
            decode_errors,
        })
    }

    /// Read-side translation of store state into gauges, run on scrape.
    pub fn refresh(
        &self,
        node_id: &str,
        healthy: bool,
        peer_count: usize,
        routing_table_size: usize,
        topology: &TopologySnapshot,
        owl: &OwlStore,
    ) {
        self.peer_count.set(peer_count as i64);
        self.topology_nodes.set(topology.nodes.len() as i64);
        self.topology_edges.set(topology.edges.len() as i64);
        self.routing_table_size.set(routing_table_size as i64);
        self.node_health
            .with_label_values(&[node_id])
            .set(if healthy { 1 } else { 0 });

        for edge in &topology.edges {
            let labels = [edge.src.as_str(), edge.dst.as_str()];
            self.owl_latency_ms
                .with_label_values(&labels)
                .set(edge.latency_ms);
            self.owl_jitter_ms
                .with_label_values(&labels)
                .set(edge.jitter_ms);
            self.owl_packet_loss_percent
                .with_label_values(&labels)
                .set(edge.loss_ratio * 100.0);
        }

        for (src, dst, skew) in owl.skews() {
            self.owl_clock_skew_ms
                .with_label_values(&[src.as_str(), dst.as_str()])
                .set(skew);
        }
    }

    /// Prometheus text exposition of everything registered.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer).unwrap_or_default())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::owl::ProbeSample;
    use crate::topology::TopologyStore;
    use ddarp_core::NodeKind;
    use std::time::Instant;

    #[test]
    fn contract_names_appear_in_exposition() {
        let metrics = NodeMetrics::new().unwrap();
        metrics.probe_sent.with_label_values(&["b"]).inc();
        metrics.decode_errors.with_label_values(&["truncated_tlv"]).inc();
        metrics.route_changes.inc();

        let now = Instant::now();
        let topo = TopologyStore::new("a", NodeKind::Regular, now);
        topo.upsert_edge(
            "b",
            "a",
            crate::owl::EdgeMetrics {
                latency_ms: 4.0,
                jitter_ms: 0.1,
                loss_ratio: 0.02,
            },
            now,
            0,
        );

        let owl = OwlStore::new();
        for seq in 0..3 {
            owl.record(
                "b",
                "a",
                ProbeSample {
                    seq,
                    latency_ms: -1.5,
                    received_at: now,
                },
            );
        }

        metrics.refresh("a", true, 1, 0, &topo.snapshot(now), &owl);
        let text = metrics.render().unwrap();

        for name in [
            "ddarp_peer_count",
            "ddarp_topology_nodes_total",
            "ddarp_topology_edges_total",
            "ddarp_routing_table_size",
            "ddarp_owl_latency_ms",
            "ddarp_owl_jitter_ms",
            "ddarp_owl_packet_loss_percent",
            "ddarp_owl_clock_skew_ms",
            "ddarp_node_health",
            "ddarp_probe_sent_total",
            "ddarp_route_changes_total",
            "ddarp_packet_decode_errors_total",
        ] {
            assert!(text.contains(name), "missing {name} in exposition");
        }

        // loss is exported as a percentage, labelled by the ordered pair
        assert!(text.contains("src=\"b\""));
        assert!(text.contains("dst=\"a\""));
        let loss_line = text
            .lines()
            .find(|l| l.starts_with("ddarp_owl_packet_loss_percent{"))
            .unwrap();
        assert!(loss_line.ends_with(" 2"), "unexpected loss line: {loss_line}");
        // skew gauge reflects the negative samples
        let skew_line = text
            .lines()
            .find(|l| l.starts_with("ddarp_owl_clock_skew_ms{"))
            .unwrap();
        assert!(skew_line.ends_with(" 1.5"), "unexpected skew line: {skew_line}");
    }
}
