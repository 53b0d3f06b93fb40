use std::time::Instant;

use axum::body::Body;
use axum::extract::MatchedPath;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;
use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";

const LATENCY_BUCKETS: [f64; 10] = [0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0];

pub async fn metrics_middleware(
    matched_path: Option<MatchedPath>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = req.method().to_string();
    let path = path_label(matched_path.as_ref().map(MatchedPath::as_str), req.uri().path());

    let response = next.run(req).await;

    let labels = [
        ("method", method),
        ("path", path.to_string()),
        ("status", response.status().as_u16().to_string()),
    ];
    counter!(HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(HTTP_REQUEST_DURATION_SECONDS, &labels).record(start.elapsed().as_secs_f64());

    response
}

/// Route template for the `path` label, never the raw path. The socket.io
/// transport is served outside the router and gets its own label.
fn path_label<'a>(matched: Option<&'a str>, raw: &str) -> &'a str {
    match matched {
        Some(route) => route,
        None if raw.starts_with("/socket.io") => "/socket.io",
        None => "unmatched",
    }
}

/// Install the Prometheus recorder and describe the HTTP metrics. Services
/// describe their own metrics after this returns.
pub fn init_metrics() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(HTTP_REQUEST_DURATION_SECONDS.to_string()),
            &LATENCY_BUCKETS,
        )?
        .install_recorder()?;

    describe_counter!(HTTP_REQUESTS_TOTAL, Unit::Count, "HTTP requests served, by route and status");
    describe_histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        Unit::Seconds,
        "HTTP request latency, by route and status"
    );

    Ok(handle)
}
