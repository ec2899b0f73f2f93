pub mod metrics_collector;
pub mod telemetry_setup;

pub use metrics_collector::{names, DispatchMetrics, DispatchOutcome};
pub use telemetry_setup::init_logging;
