//! TCP transport pieces driven by the poll server
//!
//! - [`endpoint`]: one registered peer with its decoder and outbound slot
//! - [`slot`]: the single in-flight outbound frame shared with sender handles
//! - [`metrics`]: counters and delivery latency

pub mod endpoint;
pub mod metrics;
pub(crate) mod slot;

pub use endpoint::{EndpointId, EndpointInfo, EndpointOrigin, EndpointState};
pub use metrics::ServerStats;
