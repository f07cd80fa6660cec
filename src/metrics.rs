//! Prometheus metrics for bucketdesk.
//!
//! Installs a global Prometheus recorder using `metrics-exporter-prometheus`,
//! defines metric name constants, provides a middleware for HTTP RED
//! metrics, and exposes the `/metrics` endpoint handler.

use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::{Mutex, OnceLock};
use std::time::Instant;

// -- Metric name constants ----------------------------------------------------

/// Total HTTP requests (counter). Labels: method, path, status.
pub const HTTP_REQUESTS_TOTAL: &str = "bucketdesk_http_requests_total";

/// HTTP request duration in seconds (histogram). Labels: method, path.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "bucketdesk_http_request_duration_seconds";

/// Storage operations (counter). Labels: operation, status.
pub const STORAGE_OPERATIONS_TOTAL: &str = "bucketdesk_storage_operations_total";

// -- Global recorder installation ---------------------------------------------

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
static INIT_LOCK: Mutex<()> = Mutex::new(());

/// Install the global Prometheus recorder. Calling it again returns the
/// handle installed first.
pub fn init_metrics() -> anyhow::Result<&'static PrometheusHandle> {
    let _guard = INIT_LOCK
        .lock()
        .map_err(|_| anyhow::anyhow!("metrics init lock poisoned"))?;
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle);
    }
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("failed to install Prometheus recorder: {e}"))?;
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle))
}

/// Register metric descriptions with the global recorder.
pub fn describe_metrics() {
    describe_counter!(HTTP_REQUESTS_TOTAL, "Total HTTP requests");
    describe_histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "HTTP request duration in seconds"
    );
    describe_counter!(STORAGE_OPERATIONS_TOTAL, "Storage operations by type");
}

/// Count one storage operation.
pub fn record_storage_op(operation: &'static str, ok: bool) {
    let status = if ok { "ok" } else { "error" };
    counter!(STORAGE_OPERATIONS_TOTAL, "operation" => operation, "status" => status).increment(1);
}

// -- Metrics middleware -------------------------------------------------------

/// Records HTTP RED metrics for every request except `/metrics` itself.
pub async fn metrics_middleware(
    req: Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Response {
    if req.uri().path() == "/metrics" {
        return next.run(req).await;
    }

    let method = req.method().to_string();
    let path = normalize_path(req.uri().path());

    let start = Instant::now();
    let response = next.run(req).await;
    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    counter!(HTTP_REQUESTS_TOTAL, "method" => method.clone(), "path" => path.clone(), "status" => status).increment(1);
    histogram!(HTTP_REQUEST_DURATION_SECONDS, "method" => method, "path" => path).record(duration);

    response
}

// -- Path normalization -------------------------------------------------------

/// Collapse object paths into route templates for metric labels.
///
/// - `/objects/.private/uploads/abc` -> `/objects/{path}`
/// - `/public-objects/logo.png` -> `/public-objects/{path}`
/// - `/api/public-files` -> `/api/public-files`
fn normalize_path(path: &str) -> String {
    if path.starts_with("/objects/") {
        "/objects/{path}".to_string()
    } else if path.starts_with("/public-objects/") {
        "/public-objects/{path}".to_string()
    } else if path.starts_with("/api/") || matches!(path, "/" | "/health" | "/openapi.json") {
        path.to_string()
    } else {
        "/{other}".to_string()
    }
}

// -- Metrics endpoint handler -------------------------------------------------

/// `GET /metrics` -- Render Prometheus exposition format text.
pub async fn metrics_handler() -> Response {
    match PROMETHEUS_HANDLE.get() {
        Some(handle) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics recorder not installed").into_response(),
    }
}
