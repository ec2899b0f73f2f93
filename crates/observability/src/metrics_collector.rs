use std::time::Duration;

use metrics::{counter, histogram};

/// Metric names exported by the dispatch core
pub mod names {
    pub const DISPATCH_TOTAL: &str = "mediation_dispatch_total";
    pub const DISPATCH_FAULTS_TOTAL: &str = "mediation_dispatch_faults_total";
    pub const ENDPOINT_SUSPENSIONS_TOTAL: &str = "mediation_endpoint_suspensions_total";
    pub const AGGREGATION_CLOSED_TOTAL: &str = "mediation_aggregation_closed_total";
    pub const DISPATCH_DURATION_MS: &str = "mediation_dispatch_duration_ms";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Success,
    Fault,
    Suspended,
    Timeout,
}

impl DispatchOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchOutcome::Success => "success",
            DispatchOutcome::Fault => "fault",
            DispatchOutcome::Suspended => "suspended",
            DispatchOutcome::Timeout => "timeout",
        }
    }
}

/// Recorder facade over the `metrics` macros. Without an installed recorder
/// every call is a no-op.
#[derive(Debug, Clone, Copy, Default)]
pub struct DispatchMetrics;

impl DispatchMetrics {
    pub fn record_dispatch(&self, endpoint: &str, outcome: DispatchOutcome, elapsed: Duration) {
        counter!(
            names::DISPATCH_TOTAL,
            "endpoint" => endpoint.to_string(),
            "outcome" => outcome.as_str()
        )
        .increment(1);
        histogram!(names::DISPATCH_DURATION_MS, "endpoint" => endpoint.to_string())
            .record(elapsed.as_secs_f64() * 1000.0);
    }

    pub fn record_fault(&self, endpoint: &str, code: i32) {
        counter!(
            names::DISPATCH_FAULTS_TOTAL,
            "endpoint" => endpoint.to_string(),
            "code" => code.to_string()
        )
        .increment(1);
    }

    pub fn record_suspension(&self, endpoint: &str) {
        counter!(names::ENDPOINT_SUSPENSIONS_TOTAL, "endpoint" => endpoint.to_string())
            .increment(1);
    }

    pub fn record_aggregation_closed(&self, reason: &'static str, partial: bool) {
        counter!(
            names::AGGREGATION_CLOSED_TOTAL,
            "reason" => reason,
            "partial" => if partial { "true" } else { "false" }
        )
        .increment(1);
    }
}
