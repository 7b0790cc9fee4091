//! Prometheus metrics exposition
//!
//! - `identity_requests_total` (counter): labels `status`, `method`
//! - `identity_request_duration_seconds` (histogram): label `status`
//! - `identity_auth_total` (counter): labels `operation`, `outcome`
//!
//! The session metrics recorded by the `session` crate land in the same
//! registry when a client is embedded in this process.

use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

const DURATION_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0];

fn builder() -> PrometheusBuilder {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("identity_request_duration_seconds".to_string()),
            DURATION_BUCKETS,
        )
        .expect("failed to set histogram buckets")
}

/// Install the Prometheus recorder and return a handle for rendering metrics.
///
/// Configures `identity_request_duration_seconds` with explicit buckets so it
/// renders as a histogram rather than a summary.
pub fn install_recorder() -> PrometheusHandle {
    builder()
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Record a completed HTTP request.
pub fn record_request(status: u16, method: &str, duration_secs: f64) {
    let status_str = status.to_string();
    metrics::counter!("identity_requests_total", "status" => status_str.clone(), "method" => method.to_string())
        .increment(1);
    metrics::histogram!("identity_request_duration_seconds", "status" => status_str)
        .record(duration_secs);
}

/// Record the outcome of a login, refresh or logout.
pub fn record_auth(operation: &'static str, outcome: &'static str) {
    metrics::counter!("identity_auth_total", "operation" => operation, "outcome" => outcome)
        .increment(1);
}

#[cfg(test)]
pub(crate) fn isolated_recorder() -> (
    metrics_exporter_prometheus::PrometheusRecorder,
    PrometheusHandle,
) {
    let recorder = builder().build_recorder();
    let handle = recorder.handle();
    (recorder, handle)
}
