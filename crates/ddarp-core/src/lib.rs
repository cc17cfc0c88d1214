//! ddarp-core — wire format, codec, probe authentication, and configuration.
//! All other DDARP crates depend on this one.

pub mod auth;
pub mod codec;
pub mod config;
pub mod tlv;
pub mod wire;

pub use codec::{decode, Decoded, Packet};
pub use config::{NodeConfig, NodeKind};
pub use tlv::{ProbeBody, TlvType, TlvValue};
pub use wire::WireError;
