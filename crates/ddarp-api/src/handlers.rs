//! Admin endpoint handlers.

use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use ddarp_core::NodeKind;
use ddarp_services::peer::{Liveness, PeerRegistry, UpsertOutcome};
use ddarp_services::{NodeMetrics, OwlStore, RoutingEngine, TopologyStore};

/// Everything the handlers read. Cheap to clone per request.
#[derive(Clone)]
pub struct ApiState {
    pub node_id: String,
    pub node_kind: NodeKind,
    pub version: &'static str,
    pub started_at: Instant,
    pub started_at_unix: u64,
    /// Port peers are probed on when an add request carries a bare IP.
    pub probe_port: u16,
    pub default_secret: Vec<u8>,
    pub registry: Arc<PeerRegistry>,
    pub owl: Arc<OwlStore>,
    pub topology: Arc<TopologyStore>,
    pub routing: Arc<RoutingEngine>,
    pub metrics: Arc<NodeMetrics>,
}

impl ApiState {
    fn healthy(&self) -> bool {
        !self
            .registry
            .list_peers()
            .iter()
            .any(|p| p.liveness == Liveness::Dead)
    }
}

// ── /health ───────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub node_id: String,
    pub peer_count: usize,
    pub uptime_s: u64,
}

pub async fn handle_health(State(state): State<ApiState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: if state.healthy() { "healthy" } else { "degraded" },
        node_id: state.node_id.clone(),
        peer_count: state.registry.len(),
        uptime_s: state.started_at.elapsed().as_secs(),
    })
}

// ── /node_info ────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct NodeInfoResponse {
    pub node_id: String,
    pub kind: NodeKind,
    pub version: &'static str,
    pub started_at: u64,
}

pub async fn handle_node_info(State(state): State<ApiState>) -> Json<NodeInfoResponse> {
    Json(NodeInfoResponse {
        node_id: state.node_id.clone(),
        kind: state.node_kind,
        version: state.version,
        started_at: state.started_at_unix,
    })
}

// ── /metrics/owl ──────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct OwlMatrixResponse {
    pub node_id: String,
    pub metrics_matrix: BTreeMap<String, BTreeMap<String, OwlCell>>,
}

#[derive(Serialize)]
pub struct OwlCell {
    pub latency_ms: f64,
    pub jitter_ms: f64,
    pub loss_ratio: f64,
    pub last_updated: u64,
}

pub async fn handle_owl_metrics(State(state): State<ApiState>) -> Json<OwlMatrixResponse> {
    let snapshot = state.topology.snapshot(Instant::now());
    let mut matrix: BTreeMap<String, BTreeMap<String, OwlCell>> = BTreeMap::new();
    for edge in &snapshot.edges {
        matrix.entry(edge.src.clone()).or_default().insert(
            edge.dst.clone(),
            OwlCell {
                latency_ms: edge.latency_ms,
                jitter_ms: edge.jitter_ms,
                loss_ratio: edge.loss_ratio,
                last_updated: edge.last_updated,
            },
        );
    }
    Json(OwlMatrixResponse {
        node_id: state.node_id.clone(),
        metrics_matrix: matrix,
    })
}

// ── /topology ─────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct TopologyResponse {
    pub generation: u64,
    pub nodes: Vec<TopologyNode>,
    pub edges: Vec<TopologyEdge>,
}

#[derive(Serialize)]
pub struct TopologyNode {
    pub node_id: String,
    pub kind: NodeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub liveness: Option<Liveness>,
    pub last_seen_age_s: u64,
}

#[derive(Serialize)]
pub struct TopologyEdge {
    pub src: String,
    pub dst: String,
    pub weight: f64,
    pub last_updated: u64,
    pub usable: bool,
}

pub async fn handle_topology(State(state): State<ApiState>) -> Json<TopologyResponse> {
    let snapshot = state.topology.snapshot(Instant::now());
    let nodes = snapshot
        .nodes
        .iter()
        .map(|n| TopologyNode {
            node_id: n.node_id.clone(),
            kind: n.kind,
            liveness: state.registry.get(&n.node_id).map(|p| p.liveness),
            last_seen_age_s: n.last_seen_age_s,
        })
        .collect();
    let edges = snapshot
        .edges
        .iter()
        .map(|e| TopologyEdge {
            src: e.src.clone(),
            dst: e.dst.clone(),
            weight: e.weight,
            last_updated: e.last_updated,
            usable: e.usable,
        })
        .collect();
    Json(TopologyResponse {
        generation: snapshot.generation,
        nodes,
        edges,
    })
}

// ── /routing_table ────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct RoutingTableResponse {
    pub entries: Vec<RouteView>,
}

#[derive(Serialize)]
pub struct RouteView {
    pub destination: String,
    pub next_hop: String,
    pub path: Vec<String>,
    pub cost: f64,
    pub computed_ts: u64,
}

pub async fn handle_routing_table(State(state): State<ApiState>) -> Json<RoutingTableResponse> {
    let table = state.routing.table();
    let entries = table
        .entries()
        .map(|e| RouteView {
            destination: e.destination.clone(),
            next_hop: e.next_hop.clone(),
            path: e.path.clone(),
            cost: e.cost,
            computed_ts: e.computed_unix,
        })
        .collect();
    Json(RoutingTableResponse { entries })
}

// ── /path/{destination} ───────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct PathResponse {
    pub source: String,
    pub destination: String,
    pub reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
}

pub async fn handle_path(
    State(state): State<ApiState>,
    Path(destination): Path<String>,
) -> Json<PathResponse> {
    let now = Instant::now();
    if let Some(entry) = state.routing.lookup(&destination, now) {
        return Json(PathResponse {
            source: state.node_id.clone(),
            destination,
            reachable: true,
            path: Some(entry.path),
            cost: Some(entry.cost),
            reason: None,
        });
    }

    let known = destination == state.node_id
        || state.topology.has_node(&destination)
        || state.registry.contains(&destination);
    Json(PathResponse {
        source: state.node_id.clone(),
        destination,
        reachable: false,
        path: None,
        cost: None,
        reason: Some(if known { "no_route" } else { "unknown_destination" }),
    })
}

// ── POST /peers ───────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct AddPeerRequest {
    pub peer_id: Option<String>,
    pub peer_ip: Option<String>,
    #[serde(default)]
    pub peer_type: Option<String>,
    /// Probe authentication secret; the node default applies when absent.
    #[serde(default)]
    pub secret: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AddPeerResponse {
    pub status: &'static str,
    pub peer_id: String,
    pub peer_ip: String,
    pub peer_type: NodeKind,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
}

fn bad_request(field: &str) -> (StatusCode, Json<ApiError>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ApiError {
            error: format!("missing or invalid field: {field}"),
        }),
    )
}

pub async fn handle_add_peer(
    State(state): State<ApiState>,
    Json(body): Json<AddPeerRequest>,
) -> Result<(StatusCode, Json<AddPeerResponse>), (StatusCode, Json<ApiError>)> {
    let peer_id = match body.peer_id {
        Some(id) if !id.is_empty() => id,
        _ => return Err(bad_request("peer_id")),
    };
    if peer_id == state.node_id {
        return Err(bad_request("peer_id"));
    }

    let raw_ip = body.peer_ip.filter(|s| !s.is_empty()).ok_or_else(|| bad_request("peer_ip"))?;
    let address: SocketAddr = match raw_ip.parse::<SocketAddr>() {
        Ok(addr) => addr,
        Err(_) => match raw_ip.parse::<IpAddr>() {
            Ok(ip) => SocketAddr::new(ip, state.probe_port),
            Err(_) => return Err(bad_request("peer_ip")),
        },
    };

    let kind = match body.peer_type.as_deref() {
        None | Some("") => NodeKind::Regular,
        Some(raw) => raw.parse().map_err(|_| bad_request("peer_type"))?,
    };

    let secret = body
        .secret
        .map(|s| s.into_bytes())
        .unwrap_or_else(|| state.default_secret.clone());

    let now = Instant::now();
    let outcome = state.registry.add_peer(&peer_id, address, secret, kind, now);
    state.topology.upsert_node(&peer_id, kind, now);

    let (status, word) = match outcome {
        UpsertOutcome::Added => (StatusCode::OK, "added"),
        UpsertOutcome::Unchanged => (StatusCode::OK, "unchanged"),
        // duplicate with different details: updated in place, reported as a conflict
        UpsertOutcome::Updated => (StatusCode::CONFLICT, "updated"),
    };
    tracing::info!(peer = %peer_id, %address, kind = kind.as_str(), outcome = word, "peer add");

    Ok((
        status,
        Json(AddPeerResponse {
            status: word,
            peer_id,
            peer_ip: address.to_string(),
            peer_type: kind,
        }),
    ))
}

// ── DELETE /peers/{peer_id} ───────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct RemovePeerResponse {
    pub status: &'static str,
    pub peer_id: String,
}

pub async fn handle_remove_peer(
    State(state): State<ApiState>,
    Path(peer_id): Path<String>,
) -> Result<Json<RemovePeerResponse>, (StatusCode, Json<ApiError>)> {
    if !state.registry.remove_peer(&peer_id) {
        return Err((
            StatusCode::NOT_FOUND,
            Json(ApiError {
                error: format!("unknown peer: {peer_id}"),
            }),
        ));
    }
    state.owl.drop_peer(&peer_id);
    state.topology.remove_node(&peer_id);
    tracing::info!(peer = %peer_id, "peer removed");
    Ok(Json(RemovePeerResponse {
        status: "removed",
        peer_id,
    }))
}

// ── GET /metrics ──────────────────────────────────────────────────────────────

pub async fn handle_prometheus(
    State(state): State<ApiState>,
) -> Result<String, (StatusCode, Json<ApiError>)> {
    let snapshot = state.topology.snapshot(Instant::now());
    state.metrics.refresh(
        &state.node_id,
        state.healthy(),
        state.registry.len(),
        state.routing.table().len(),
        &snapshot,
        &state.owl,
    );
    state.metrics.render().map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiError {
                error: e.to_string(),
            }),
        )
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
