//! ddarp-api — the admin and metrics HTTP surface.
//!
//! Read-only introspection over the stores plus peer add/remove. Every
//! request is bounded to 10 seconds; the handlers are plumbing over the
//! engines in ddarp-services.

pub mod handlers;

use std::time::Duration;

use axum::routing::{delete, get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;

pub use handlers::ApiState;

/// Build the admin router.
pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::handle_health))
        .route("/node_info", get(handlers::handle_node_info))
        .route("/metrics/owl", get(handlers::handle_owl_metrics))
        .route("/metrics", get(handlers::handle_prometheus))
        .route("/topology", get(handlers::handle_topology))
        .route("/routing_table", get(handlers::handle_routing_table))
        .route("/path/{destination}", get(handlers::handle_path))
        .route("/peers", post(handlers::handle_add_peer))
        .route("/peers/{peer_id}", delete(handlers::handle_remove_peer))
        .with_state(state)
        .layer(cors)
        .layer(TimeoutLayer::new(Duration::from_secs(10)))
}

/// Serve the admin surface on a pre-bound listener until the process ends.
pub async fn serve(state: ApiState, listener: TcpListener) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "admin surface listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}
