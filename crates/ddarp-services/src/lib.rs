//! ddarp-services — the control-plane engines: peer registry, measurement
//! state, topology store, routing, path decisions, and metrics.

pub mod metrics;
pub mod owl;
pub mod peer;
pub mod routing;
pub mod sink;
pub mod topology;

pub use metrics::NodeMetrics;
pub use owl::{EdgeMetrics, OwlStore, ProbeSample};
pub use peer::{Liveness, PeerRecord, PeerRegistry, ProbeTarget, UpsertOutcome};
pub use routing::{RouteEntry, RoutingEngine, RoutingTable};
pub use sink::{DataPlane, DecisionSink, LoggingDataPlane, RecordingDataPlane, RouteAdvertisement};
pub use topology::{GraphSnapshot, TopologySnapshot, TopologyStore};
