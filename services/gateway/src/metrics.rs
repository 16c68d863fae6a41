//! Prometheus metrics for the gateway

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and register metric descriptions.
/// Must be called once, before any metrics are recorded.
pub fn install_recorder() -> anyhow::Result<PrometheusHandle> {
    let builder = PrometheusBuilder::new().set_buckets_for_metric(
        Matcher::Full("gateway_request_duration_seconds".to_string()),
        &[
            0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
        ],
    )?;
    let handle = builder.install_recorder()?;
    describe_metrics();
    Ok(handle)
}

fn describe_metrics() {
    describe_counter!(
        "gateway_requests_total",
        "Total requests handled, labeled by route and status code"
    );
    describe_histogram!(
        "gateway_request_duration_seconds",
        "Request handling duration in seconds"
    );
    describe_counter!(
        "gateway_upstream_errors_total",
        "Failed upstream calls, labeled by error type"
    );
    describe_gauge!(
        "gateway_active_credentials",
        "Credentials in the pool that have not been deprecated"
    );
}

pub fn record_request(route: &'static str, status: u16, duration_secs: f64) {
    counter!(
        "gateway_requests_total",
        "route" => route,
        "status" => status.to_string(),
    )
    .increment(1);
    histogram!("gateway_request_duration_seconds", "route" => route).record(duration_secs);
}

pub fn record_upstream_error(error_type: &'static str) {
    counter!("gateway_upstream_errors_total", "error_type" => error_type).increment(1);
}

pub fn set_active_credentials(count: usize) {
    gauge!("gateway_active_credentials").set(count as f64);
}
