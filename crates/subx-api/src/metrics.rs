//! Prometheus metrics for the API server.

use std::sync::LazyLock;
use std::time::Instant;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use regex_lite::Regex;

/// Install the Prometheus recorder and return its render handle.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Metric names as constants for consistency.
pub mod names {
    // HTTP metrics
    pub const HTTP_REQUESTS_TOTAL: &str = "subx_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "subx_http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "subx_http_requests_in_flight";

    // WebSocket metrics
    pub const WS_CONNECTIONS_TOTAL: &str = "subx_ws_connections_total";
    pub const WS_CONNECTIONS_ACTIVE: &str = "subx_ws_connections_active";
    pub const WS_MESSAGES_SENT: &str = "subx_ws_messages_sent_total";

    // Jobs
    pub const JOBS_ENQUEUED_TOTAL: &str = "subx_jobs_enqueued_total";
    pub const JOBS_CANCELLED_TOTAL: &str = "subx_jobs_cancelled_total";

    pub const RATE_LIMIT_HITS_TOTAL: &str = "subx_rate_limit_hits_total";
}

/// Record an HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", sanitize_path(path)),
        ("status", status.to_string()),
    ];

    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

pub fn record_ws_connection(endpoint: &str) {
    let labels = [("endpoint", endpoint.to_string())];
    counter!(names::WS_CONNECTIONS_TOTAL, &labels).increment(1);
}

pub fn set_ws_active_connections(count: i64) {
    gauge!(names::WS_CONNECTIONS_ACTIVE).set(count as f64);
}

pub fn record_ws_message_sent(endpoint: &str, message_type: &str) {
    let labels = [
        ("endpoint", endpoint.to_string()),
        ("type", message_type.to_string()),
    ];
    counter!(names::WS_MESSAGES_SENT, &labels).increment(1);
}

pub fn record_job_enqueued(job_type: &str) {
    let labels = [("type", job_type.to_string())];
    counter!(names::JOBS_ENQUEUED_TOTAL, &labels).increment(1);
}

pub fn record_job_cancelled(job_type: &str) {
    let labels = [("type", job_type.to_string())];
    counter!(names::JOBS_CANCELLED_TOTAL, &labels).increment(1);
}

pub fn record_rate_limit_hit(endpoint: &str) {
    let labels = [("endpoint", endpoint.to_string())];
    counter!(names::RATE_LIMIT_HITS_TOTAL, &labels).increment(1);
}

static UUID_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}").ok()
});

static NUMERIC_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"/[0-9]+(/|$)").ok());

/// Sanitize path for metrics labels (remove IDs and object keys).
fn sanitize_path(path: &str) -> String {
    // Object keys are unbounded
    if path.starts_with("/files/") {
        return "/files/:key".to_string();
    }

    let mut path = path.to_string();
    if let Some(re) = UUID_RE.as_ref() {
        path = re.replace_all(&path, ":id").into_owned();
    }
    if let Some(re) = NUMERIC_RE.as_ref() {
        path = re.replace_all(&path, "/:id$1").into_owned();
    }
    path
}

/// Metrics middleware for HTTP requests.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).increment(1.0);

    let response = next.run(request).await;

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);

    let status = response.status().as_u16();
    record_http_request(&method, &path, status, start.elapsed().as_secs_f64());

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_path() {
        assert_eq!(
            sanitize_path("/api/projects/550e8400-e29b-41d4-a716-446655440000/subtitles"),
            "/api/projects/:id/subtitles"
        );
        assert_eq!(sanitize_path("/api/glossary/42"), "/api/glossary/:id");
        assert_eq!(
            sanitize_path("/files/users/u1/p1/source/movie.mkv"),
            "/files/:key"
        );
    }
}
