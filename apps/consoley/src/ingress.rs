//! HTTP ingress for backend events. The worker (or anything standing in for
//! it) posts `vnc-ready` here; the handler republishes it on the local bus.

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use readiness_bus::{BusError, EventBus};
use serde::Serialize;
use serde_json::json;
use session_readiness::StatusReader;
use tokio::net::TcpListener;
use tracing::{debug, info};

#[derive(Clone)]
pub struct IngressState {
    pub bus: Arc<dyn EventBus>,
    pub status: StatusReader,
    pub metrics: Option<PrometheusHandle>,
}

#[derive(Debug, Serialize)]
struct EventAccepted {
    event: String,
    delivered: usize,
}

pub fn router(state: IngressState) -> Router {
    Router::new()
        .route("/healthz", get(health_handler))
        .route("/status", get(status_handler))
        .route("/metrics", get(metrics_handler))
        .route("/events/:name", post(event_handler))
        .with_state(state)
}

/// Serves until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: IngressState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr().context("ingress listener has no address")?;
    info!(target = "consoley.ingress", %addr, "event ingress listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("event ingress stopped with error")
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn status_handler(State(state): State<IngressState>) -> impl IntoResponse {
    Json(state.status.current())
}

async fn metrics_handler(State(state): State<IngressState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn event_handler(
    State(state): State<IngressState>,
    Path(name): Path<String>,
) -> Response {
    // Nobody listening is not the sender's fault; events are hints.
    let delivered = match state.bus.publish(&name) {
        Ok(delivered) => delivered,
        Err(BusError::NoSubscribers(_)) => 0,
        Err(err @ BusError::EmptyName) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "bad_request", "message": err.to_string() })),
            )
                .into_response();
        }
    };
    debug!(target = "consoley.ingress", event = %name, delivered, "backend event received");
    (
        StatusCode::ACCEPTED,
        Json(EventAccepted {
            event: name,
            delivered,
        }),
    )
        .into_response()
}
