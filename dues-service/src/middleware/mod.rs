pub mod actor;
pub mod metrics;

pub use actor::Actor;
pub use metrics::metrics_middleware;
