use axum::extract::State;
use axum::http::StatusCode;
use axum::{routing, Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;

use crate::metrics::track_metrics;
use crate::status::{HealthStatus, PollerSnapshot, PollerStatus};

pub fn router(status: PollerStatus, metrics: Option<PrometheusHandle>) -> Router {
    Router::new()
        .route("/", routing::get(index))
        .route("/_readiness", routing::get(readiness))
        .route("/_liveness", routing::get(liveness))
        .route("/status", routing::get(pollers))
        .route(
            "/metrics",
            routing::get(move || match metrics {
                Some(ref recorder_handle) => std::future::ready(recorder_handle.render()),
                None => std::future::ready("no metrics recorder installed".to_owned()),
            }),
        )
        .layer(axum::middleware::from_fn(track_metrics))
        .with_state(status)
}

pub async fn index() -> &'static str {
    "topic poller"
}

async fn readiness(State(status): State<PollerStatus>) -> StatusCode {
    status.readiness()
}

async fn liveness(State(status): State<PollerStatus>) -> HealthStatus {
    status.liveness()
}

async fn pollers(State(status): State<PollerStatus>) -> Json<Vec<PollerSnapshot>> {
    Json(status.snapshot())
}
