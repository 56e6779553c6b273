//! Metrics and observability utilities
//!
//! Prometheus metrics for DDL outcomes, sync runs, onboarding and the
//! HTTP surface, with standardized naming.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all OrgForge metrics
pub const METRICS_PREFIX: &str = "orgforge";

/// Buckets for request latency (in seconds)
pub const LATENCY_BUCKETS: &[f64] = &[
    0.005,  // 5ms
    0.010,  // 10ms
    0.025,  // 25ms
    0.050,  // 50ms
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.500,  // 2.5s
    5.000,  // 5s
    10.00,  // 10s
];

/// Buckets for sync runs; DDL calls take seconds each
pub const SYNC_BUCKETS: &[f64] = &[
    0.5,
    1.0,
    2.5,
    5.0,
    10.0,
    30.0,
    60.0,
    120.0,
    300.0,
    600.0,
];

/// Bucket layout for each histogram, applied by the Prometheus exporter
pub fn histogram_buckets() -> Vec<(String, &'static [f64])> {
    vec![
        (format!("{}_request_duration_seconds", METRICS_PREFIX), LATENCY_BUCKETS),
        (format!("{}_sync_duration_seconds", METRICS_PREFIX), SYNC_BUCKETS),
    ]
}

/// Register all metric descriptions
pub fn register_metrics() {
    // Request metrics
    describe_counter!(
        format!("{}_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of HTTP requests"
    );

    describe_histogram!(
        format!("{}_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "HTTP request latency in seconds"
    );

    // Warehouse metrics
    describe_counter!(
        format!("{}_ddl_operations_total", METRICS_PREFIX),
        Unit::Count,
        "Warehouse DDL calls by operation and outcome"
    );

    // Sync metrics
    describe_counter!(
        format!("{}_sync_runs_total", METRICS_PREFIX),
        Unit::Count,
        "Schema sync runs by scope and outcome"
    );

    describe_histogram!(
        format!("{}_sync_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Schema sync duration in seconds"
    );

    // Tenant metrics
    describe_counter!(
        format!("{}_onboardings_total", METRICS_PREFIX),
        Unit::Count,
        "Organization onboarding attempts by outcome"
    );

    describe_counter!(
        format!("{}_api_key_validations_total", METRICS_PREFIX),
        Unit::Count,
        "Organization API key validations by outcome"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record request metrics
pub struct RequestMetrics {
    start: Instant,
    endpoint: String,
    method: String,
}

impl RequestMetrics {
    /// Start tracking a request
    pub fn start(method: &str, endpoint: &str) -> Self {
        Self {
            start: Instant::now(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
        }
    }

    /// Record request completion
    pub fn finish(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_requests_total", METRICS_PREFIX),
            "method" => self.method.clone(),
            "endpoint" => self.endpoint.clone(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            format!("{}_request_duration_seconds", METRICS_PREFIX),
            "method" => self.method,
            "endpoint" => self.endpoint
        )
        .record(duration);
    }
}

/// Record one warehouse DDL call
pub fn record_ddl(operation: &str, outcome: &str) {
    counter!(
        format!("{}_ddl_operations_total", METRICS_PREFIX),
        "operation" => operation.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record a finished sync run
pub fn record_sync(scope: &str, outcome: &str, duration_secs: f64) {
    counter!(
        format!("{}_sync_runs_total", METRICS_PREFIX),
        "scope" => scope.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    histogram!(
        format!("{}_sync_duration_seconds", METRICS_PREFIX),
        "scope" => scope.to_string()
    )
    .record(duration_secs);
}

pub fn record_onboarding(outcome: &str) {
    counter!(
        format!("{}_onboardings_total", METRICS_PREFIX),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

pub fn record_key_validation(valid: bool) {
    let outcome = if valid { "valid" } else { "invalid" };
    counter!(
        format!("{}_api_key_validations_total", METRICS_PREFIX),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}
