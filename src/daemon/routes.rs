// src/daemon/routes.rs

//! Axum router for dnfdaemon
//!
//! Defines the HTTP routes served on the daemon socket:
//! - `/health` - Liveness check (no authorization)
//! - `/v1/call` - Named operation call, one JSON object per request
//! - `/v1/events` - SSE stream carrying every daemon signal
//!
//! The caller identity is attached to each connection by the accept loop as a
//! request extension; clients never name themselves.

use super::auth::CallerId;
use super::dispatch::{API_VERSION, MethodCall, shutdown_requested};
use super::{DaemonState, ProblemDocument};
use crate::error::Error;
use axum::{
    Extension, Router,
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{
        IntoResponse, Json, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{debug, warn};

/// Shared daemon state type
pub type SharedState = Arc<DaemonState>;

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub api_version: i64,
    pub pid: u32,
    pub uptime_secs: u64,
    pub locked: bool,
}

/// Successful call reply
#[derive(Debug, Serialize, Deserialize)]
pub struct CallResponse {
    pub result: serde_json::Value,
}

/// Error response rendered as a problem document
pub struct ApiError(ProblemDocument);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(ProblemDocument::from_error(&err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        (
            status,
            [("content-type", "application/problem+json")],
            Json(&self.0),
        )
            .into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

/// Build the router for the daemon socket
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .nest("/v1", build_v1_router())
        .with_state(state)
}

fn build_v1_router() -> Router<SharedState> {
    Router::new()
        .route("/call", post(call_handler))
        .route("/events", get(events_handler))
}

/// GET /health
async fn health_handler(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        api_version: API_VERSION,
        pid: std::process::id(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        locked: state.dispatcher.session().lock().is_locked(),
    })
}

/// POST /v1/call
///
/// The body is `{"method": "<Name>", "args": {...}}`. Dispatch runs on the
/// blocking pool since engine calls are synchronous.
async fn call_handler(
    State(state): State<SharedState>,
    Extension(caller): Extension<CallerId>,
    body: Bytes,
) -> ApiResult<Json<CallResponse>> {
    let call: MethodCall = serde_json::from_slice(&body).map_err(|e| {
        debug!("Rejected call body from {}: {}", caller, e);
        ApiError(ProblemDocument::bad_request(&format!(
            "invalid call: {}",
            e
        )))
    })?;

    let dispatcher = state.dispatcher.clone();
    let result = tokio::task::spawn_blocking(move || dispatcher.dispatch(&caller, call))
        .await
        .map_err(|e| ApiError::from(Error::Service(format!("Task join error: {}", e))))?;

    Ok(Json(CallResponse { result: result? }))
}

/// GET /v1/events
///
/// Streams every signal as an SSE event named after the signal, with the
/// JSON-encoded signal as data. The stream ends when the daemon shuts down.
async fn events_handler(
    State(state): State<SharedState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.dispatcher.subscribe();

    let event_stream = BroadcastStream::new(rx).filter_map(|result| match result {
        Ok(event) => match serde_json::to_string(&event) {
            Ok(json) => Some(Ok(Event::default().event(event.name()).data(json))),
            Err(e) => {
                warn!("Dropping unserializable {} signal: {}", event.name(), e);
                None
            }
        },
        Err(BroadcastStreamRecvError::Lagged(n)) => {
            warn!("SSE client lagged {} events", n);
            Some(Ok(Event::default()
                .event("warning")
                .data(format!(r#"{{"lagged": {}}}"#, n))))
        }
    });

    let connected_event = stream::once(async {
        Ok::<_, Infallible>(
            Event::default()
                .event("connected")
                .data(r#"{"status": "connected"}"#),
        )
    });

    let stopped = shutdown_requested(state.dispatcher.shutdown_signal());
    let stream = futures::StreamExt::take_until(connected_event.chain(event_stream), stopped);

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(30))
            .text("keepalive"),
    )
}
