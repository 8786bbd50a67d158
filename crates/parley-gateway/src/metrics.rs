//! Prometheus metrics recording and endpoint.

use std::sync::OnceLock;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder once per process and return its handle.
pub fn install_prometheus_recorder() -> Result<&'static PrometheusHandle, BuildError> {
    if let Some(handle) = HANDLE.get() {
        return Ok(handle);
    }
    let handle = PrometheusBuilder::new().install_recorder()?;
    Ok(HANDLE.get_or_init(|| handle))
}

/// Render the current metrics, if a recorder is installed.
pub fn render() -> Option<String> {
    HANDLE.get().map(PrometheusHandle::render)
}

/// Record a new WebSocket connection.
pub fn record_ws_connect() {
    metrics::gauge!("ws_connections_active").increment(1.0);
}

/// Record a WebSocket disconnection.
pub fn record_ws_disconnect() {
    metrics::gauge!("ws_connections_active").decrement(1.0);
}

/// Record a finished pipeline request with its duration.
pub fn record_request(mode: &str, duration_secs: f64) {
    let labels = [("mode", mode.to_string())];
    metrics::counter!("pipeline_requests_total", &labels).increment(1);
    metrics::histogram!("pipeline_duration_seconds", &labels).record(duration_secs);
}

/// Record a request that failed at `stage`.
pub fn record_failure(stage: &str) {
    let labels = [("stage", stage.to_string())];
    metrics::counter!("pipeline_failures_total", &labels).increment(1);
}
