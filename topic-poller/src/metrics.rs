use std::time::Instant;

use axum::{body::Body, extract::MatchedPath, http::Request, middleware::Next, response::Response};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Tick durations run up to half a poll interval, so the buckets reach
/// further than the usual request latencies.
const DURATION_BUCKETS_SECONDS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

/// Install the process-wide Prometheus recorder. Can only succeed once per
/// process.
pub fn setup_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new()
        .set_buckets(DURATION_BUCKETS_SECONDS)?
        .install_recorder()
}

/// Count and time status endpoint requests, labelled by matched route so
/// unknown paths don't each get their own series.
pub async fn track_metrics(req: Request<Body>, next: Next) -> Response {
    let started = Instant::now();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map_or("unmatched", MatchedPath::as_str)
        .to_owned();
    let method = req.method().to_string();

    let response = next.run(req).await;

    let labels = [
        ("route", route),
        ("method", method),
        ("status", response.status().as_u16().to_string()),
    ];
    metrics::counter!("topic_poller_http_requests_total", &labels).increment(1);
    metrics::histogram!("topic_poller_http_request_duration_seconds", &labels)
        .record(started.elapsed().as_secs_f64());

    response
}
