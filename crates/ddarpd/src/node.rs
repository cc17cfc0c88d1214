//! The composite node: owns every subsystem and drives the periodic tasks.
//!
//! Task layout mirrors the concurrency design: one receive loop, one probe
//! emitter, one gossip emitter, one liveness sweep, one routing loop that
//! also drives the path-decision sink, and the admin surface. Shutdown
//! fans out over a watch channel, then in-flight receives get a two
//! second grace before the sockets drop.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::watch;

use ddarp_api::ApiState;
use ddarp_core::NodeConfig;
use ddarp_services::{
    DecisionSink, LoggingDataPlane, NodeMetrics, OwlStore, PeerRegistry, RoutingEngine,
    TopologyStore,
};

use crate::probe::{self, Receiver};

/// How long in-flight receives get to finish after shutdown is signalled.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Liveness sweep cadence.
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

pub struct CompositeNode {
    cfg: NodeConfig,
    registry: Arc<PeerRegistry>,
    owl: Arc<OwlStore>,
    topology: Arc<TopologyStore>,
    routing: Arc<RoutingEngine>,
    metrics: Arc<NodeMetrics>,
    started_at: Instant,
}

impl CompositeNode {
    pub fn new(cfg: NodeConfig) -> Result<Self> {
        let started_at = Instant::now();
        let metrics = NodeMetrics::new().context("registering metrics")?;
        Ok(Self {
            registry: Arc::new(PeerRegistry::new()),
            owl: Arc::new(OwlStore::new()),
            topology: Arc::new(TopologyStore::new(&cfg.node_id, cfg.node_kind, started_at)),
            routing: Arc::new(RoutingEngine::new(&cfg.node_id)),
            metrics: Arc::new(metrics),
            started_at,
            cfg,
        })
    }

    pub fn registry(&self) -> Arc<PeerRegistry> {
        self.registry.clone()
    }

    pub fn topology(&self) -> Arc<TopologyStore> {
        self.topology.clone()
    }

    pub fn routing(&self) -> Arc<RoutingEngine> {
        self.routing.clone()
    }

    /// Run until ctrl-c or a task dies.
    pub async fn run(self) -> Result<()> {
        // bind failures are fatal at startup
        let socket = UdpSocket::bind(self.cfg.listen_addr)
            .await
            .with_context(|| format!("binding probe socket on {}", self.cfg.listen_addr))?;
        let socket = Arc::new(socket);
        tracing::info!(addr = %self.cfg.listen_addr, "probe socket bound");

        let api_listener = TcpListener::bind(self.cfg.api_addr)
            .await
            .with_context(|| format!("binding admin surface on {}", self.cfg.api_addr))?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let recv_task = tokio::spawn(probe::recv_loop(
            socket.clone(),
            Receiver {
                local_id: self.cfg.node_id.clone(),
                registry: self.registry.clone(),
                owl: self.owl.clone(),
                topology: self.topology.clone(),
                metrics: self.metrics.clone(),
            },
            shutdown_rx.clone(),
        ));

        let send_task = tokio::spawn(probe::send_loop(
            socket.clone(),
            self.registry.clone(),
            self.metrics.clone(),
            self.cfg.node_id.clone(),
            Duration::from_millis(self.cfg.probe_interval_ms),
            self.started_at,
            shutdown_rx.clone(),
        ));

        let gossip_task = tokio::spawn(probe::gossip_loop(
            socket.clone(),
            self.registry.clone(),
            self.owl.clone(),
            self.cfg.node_id.clone(),
            shutdown_rx.clone(),
        ));

        let sweep_task = tokio::spawn(sweep_loop(self.registry.clone(), shutdown_rx.clone()));

        let route_task = tokio::spawn(route_loop(
            self.topology.clone(),
            self.routing.clone(),
            self.registry.clone(),
            self.metrics.clone(),
            Duration::from_millis(self.cfg.recompute_interval_ms),
            shutdown_rx.clone(),
        ));

        let api_state = ApiState {
            node_id: self.cfg.node_id.clone(),
            node_kind: self.cfg.node_kind,
            version: env!("CARGO_PKG_VERSION"),
            started_at: self.started_at,
            started_at_unix: probe::unix_secs(),
            probe_port: self.cfg.listen_addr.port(),
            default_secret: self.cfg.default_secret.clone().into_bytes(),
            registry: self.registry.clone(),
            owl: self.owl.clone(),
            topology: self.topology.clone(),
            routing: self.routing.clone(),
            metrics: self.metrics.clone(),
        };
        let api_task = tokio::spawn(ddarp_api::serve(api_state, api_listener));

        tracing::info!(node_id = %self.cfg.node_id, "node running");

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown requested");
            }
            r = recv_task => tracing::error!("receive loop exited: {:?}", r),
            r = send_task => tracing::error!("probe emitter exited: {:?}", r),
            r = gossip_task => tracing::error!("gossip emitter exited: {:?}", r),
            r = sweep_task => tracing::error!("liveness sweep exited: {:?}", r),
            r = route_task => tracing::error!("routing loop exited: {:?}", r),
            r = api_task => tracing::error!("admin surface exited: {:?}", r),
        }

        // stop accepting new work, then drain in-flight receives
        let _ = shutdown_tx.send(true);
        tokio::time::sleep(SHUTDOWN_GRACE).await;
        tracing::info!("node stopped");
        Ok(())
    }
}

/// Age peer liveness once a second and log every transition.
async fn sweep_loop(
    registry: Arc<PeerRegistry>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let mut interval = tokio::time::interval(SWEEP_INTERVAL);
    loop {
        tokio::select! {
            _ = shutdown.changed() => return Ok(()),
            _ = interval.tick() => {}
        }

        let now = Instant::now();
        for transition in registry.sweep(now) {
            tracing::info!(
                peer = %transition.node_id,
                from = ?transition.from,
                to = ?transition.to,
                "peer liveness changed"
            );
        }
        for peer in registry.needing_attention(now) {
            tracing::warn!(peer = %peer, "peer dead for over two minutes, operator action required");
        }
    }
}

/// Recompute routes on the configured cadence or whenever the topology
/// changes, then hand the fresh table to the decision sink. Running the
/// sink inline keeps its deltas ordered with the passes that caused them.
async fn route_loop(
    topology: Arc<TopologyStore>,
    routing: Arc<RoutingEngine>,
    registry: Arc<PeerRegistry>,
    metrics: Arc<NodeMetrics>,
    recompute_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let mut interval = tokio::time::interval(recompute_interval);
    let mut sink = DecisionSink::new(routing.local_id());
    let plane = LoggingDataPlane;

    loop {
        tokio::select! {
            _ = shutdown.changed() => return Ok(()),
            _ = interval.tick() => {}
            _ = topology.dirty().notified() => {}
        }

        let now = Instant::now();
        let (edges_evicted, nodes_evicted) = topology.evict_stale(now);
        if edges_evicted + nodes_evicted > 0 {
            tracing::debug!(edges_evicted, nodes_evicted, "evicted stale topology");
        }

        let graph = topology.graph(now);
        let outcome = routing.run_pass(&graph, now, probe::unix_secs());
        if outcome.changes() > 0 {
            metrics.route_changes.inc_by(outcome.changes());
            tracing::info!(
                generation = graph.generation,
                installed = outcome.installed,
                replaced = outcome.replaced,
                evicted = outcome.evicted,
                routes = outcome.table.len(),
                "routing table updated"
            );
        }

        let endpoints: BTreeMap<_, _> = registry
            .list_peers()
            .into_iter()
            .map(|p| (p.node_id, p.transport_address))
            .collect();
        let report = sink.apply(&outcome.table, &topology.snapshot(now), &endpoints, &plane);
        if !report.is_quiet() {
            tracing::debug!(
                advertised = report.advertised.len(),
                revoked = report.revoked.len(),
                tunnels_requested = report.tunnels_requested.len(),
                tunnels_released = report.tunnels_released.len(),
                "path decisions emitted"
            );
        }
    }
}
