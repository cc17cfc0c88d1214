//! Daemon configuration.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $DDARP_CONFIG (explicit override)
//!   2. /etc/ddarp/config.toml

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::wire::DEFAULT_PORT;

/// Whether a node participates as a plain mesh member or as a border
/// node that fronts external prefixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Regular,
    Border,
}

impl NodeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeKind::Regular => "regular",
            NodeKind::Border => "border",
        }
    }
}

impl FromStr for NodeKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "regular" => Ok(NodeKind::Regular),
            "border" => Ok(NodeKind::Border),
            other => Err(ConfigError::InvalidValue {
                field: "node_kind",
                value: other.to_string(),
            }),
        }
    }
}

/// Top-level daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// This node's identity in the mesh. Case-sensitive, must be non-empty.
    pub node_id: String,

    /// Regular mesh member or border node.
    pub node_kind: NodeKind,

    /// UDP address probes and control messages are received on.
    pub listen_addr: SocketAddr,

    /// TCP address of the admin/metrics HTTP surface.
    pub api_addr: SocketAddr,

    /// Probe emission interval per peer, in milliseconds.
    pub probe_interval_ms: u64,

    /// Routing recomputation interval, in milliseconds.
    pub recompute_interval_ms: u64,

    /// Shared secret assumed for peers added without one of their own.
    pub default_secret: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: "ddarp-node".to_string(),
            node_kind: NodeKind::Regular,
            listen_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            api_addr: SocketAddr::from(([127, 0, 0, 1], 8000)),
            probe_interval_ms: 1000,
            recompute_interval_ms: 5000,
            default_secret: "default_secret".to_string(),
        }
    }
}

impl NodeConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            NodeConfig::default()
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("DDARP_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/etc/ddarp/config.toml"))
    }

    /// Apply DDARP_* env var overrides.
    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(v) = std::env::var("DDARP_NODE_ID") {
            self.node_id = v;
        }
        if let Ok(v) = std::env::var("DDARP_NODE_KIND") {
            self.node_kind = v.parse()?;
        }
        if let Ok(v) = std::env::var("DDARP_LISTEN_ADDR") {
            self.listen_addr = parse_env("listen_addr", &v)?;
        }
        if let Ok(v) = std::env::var("DDARP_API_ADDR") {
            self.api_addr = parse_env("api_addr", &v)?;
        }
        if let Ok(v) = std::env::var("DDARP_PROBE_INTERVAL_MS") {
            self.probe_interval_ms = parse_env("probe_interval_ms", &v)?;
        }
        if let Ok(v) = std::env::var("DDARP_RECOMPUTE_INTERVAL_MS") {
            self.recompute_interval_ms = parse_env("recompute_interval_ms", &v)?;
        }
        if let Ok(v) = std::env::var("DDARP_SECRET") {
            self.default_secret = v;
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.node_id.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "node_id",
                value: String::new(),
            });
        }
        if self.probe_interval_ms == 0 || self.recompute_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "interval",
                value: "0".to_string(),
            });
        }
        Ok(())
    }
}

fn parse_env<T: FromStr>(field: &'static str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        field,
        value: value.to_string(),
    })
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("invalid value for {field}: {value:?}")]
    InvalidValue { field: &'static str, value: String },
}
