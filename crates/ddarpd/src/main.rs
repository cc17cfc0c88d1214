//! ddarpd — distributed adaptive routing daemon.

use anyhow::{Context, Result};

use ddarp_core::NodeConfig;
use ddarpd::CompositeNode;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cfg = NodeConfig::load().context("loading configuration")?;
    tracing::info!(
        node_id = %cfg.node_id,
        kind = cfg.node_kind.as_str(),
        listen = %cfg.listen_addr,
        api = %cfg.api_addr,
        "ddarpd starting"
    );

    let node = CompositeNode::new(cfg)?;
    node.run().await
}
