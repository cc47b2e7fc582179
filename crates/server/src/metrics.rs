//! Observability metrics
//!
//! Prometheus metrics endpoint and recording helpers.

use axum::{
    http::{header, StatusCode},
    response::IntoResponse,
};
use metrics::{counter, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the metrics recorder; call once at startup
pub fn init_metrics() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    register_default_metrics();

    METRICS_HANDLE.get_or_init(|| handle.clone());
    handle
}

fn register_default_metrics() {
    gauge!("asr_sessions_active").set(0.0);
    counter!("asr_sessions_created_total").absolute(0);
    counter!("asr_utterances_total").absolute(0);
    counter!("asr_partial_results_total").absolute(0);
    counter!("asr_decode_errors_total").absolute(0);
}

pub fn record_session_created() {
    counter!("asr_sessions_created_total").increment(1);
}

pub fn record_active_sessions(count: usize) {
    gauge!("asr_sessions_active").set(count as f64);
}

pub fn record_utterance() {
    counter!("asr_utterances_total").increment(1);
}

pub fn record_partial() {
    counter!("asr_partial_results_total").increment(1);
}

pub fn record_decode_error() {
    counter!("asr_decode_errors_total").increment(1);
}

/// Prometheus-formatted metrics endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    match METRICS_HANDLE.get() {
        Some(handle) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                "text/plain; version=0.0.4; charset=utf-8",
            )],
            handle.render(),
        ),
        None => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(header::CONTENT_TYPE, "text/plain")],
            "metrics not initialized".to_string(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_helpers_do_not_panic() {
        record_session_created();
        record_active_sessions(3);
        record_utterance();
        record_partial();
        record_decode_error();
    }
}
