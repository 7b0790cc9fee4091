//! Session metrics
//!
//! Recorded through the `metrics` facade; the embedding binary decides
//! whether a recorder is installed.
//!
//! - `session_refresh_total` (counter): label `outcome`
//! - `session_refresh_waiters` (histogram): followers drained per cycle
//! - `session_request_retries_total` (counter)

use crate::error::Error;

/// Outcome label for a finished refresh cycle; `None` is success.
pub(crate) fn outcome_label(failure: Option<&Error>) -> &'static str {
    match failure {
        None => "success",
        Some(Error::SessionExpired) => "expired",
        Some(Error::Unauthorized(_)) => "unauthorized",
        Some(_) => "network",
    }
}

/// Record a completed refresh cycle and how many followers it released.
pub(crate) fn record_refresh(outcome: &'static str, waiters: usize) {
    metrics::counter!("session_refresh_total", "outcome" => outcome).increment(1);
    metrics::histogram!("session_refresh_waiters").record(waiters as f64);
}

/// Record a request re-sent after a 401.
pub(crate) fn record_retry() {
    metrics::counter!("session_request_retries_total").increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusBuilder;

    #[test]
    fn outcome_labels() {
        assert_eq!(outcome_label(None), "success");
        assert_eq!(outcome_label(Some(&Error::SessionExpired)), "expired");
        assert_eq!(
            outcome_label(Some(&Error::Unauthorized("no refresh credential".into()))),
            "unauthorized"
        );
        assert_eq!(
            outcome_label(Some(&Error::NetworkFailure("timeout".into()))),
            "network"
        );
    }

    #[test]
    fn record_functions_do_not_panic_without_recorder() {
        record_refresh("success", 3);
        record_retry();
    }

    #[test]
    fn refresh_and_retry_counters_render() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_refresh("success", 4);
        record_refresh("expired", 0);
        record_retry();

        let output = handle.render();
        assert!(output.contains("session_refresh_total{outcome=\"success\"} 1"));
        assert!(output.contains("session_refresh_total{outcome=\"expired\"} 1"));
        assert!(output.contains("session_refresh_waiters"));
        assert!(output.contains("session_request_retries_total 1"));
    }
}
