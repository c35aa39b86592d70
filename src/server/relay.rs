//! Relay-side routes: republished stream plus bridge diagnostics

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::sse::{Event as SseEvent, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{self, Stream, StreamExt};
use serde_json::{json, Value};
use tracing::{debug, error, warn};

use super::{keep_alive, sse_data, subscription_stream};
use crate::config::{RelayConfig, ServerConfig};
use crate::relay::RelayBridge;

/// SSE event name of everything the relay streams
pub const RELAY_EVENT: &str = "telemetry";

/// Shared state of the relay routes
#[derive(Clone)]
pub struct RelayState {
    pub bridge: RelayBridge,
    pub config: RelayConfig,
    pub keepalive: Duration,
}

impl RelayState {
    pub fn new(bridge: RelayBridge, config: &RelayConfig, server: &ServerConfig) -> Self {
        Self {
            bridge,
            config: config.clone(),
            keepalive: Duration::from_secs(server.keepalive_s),
        }
    }

    fn kick_bridge(&self) {
        if let Err(e) = self.bridge.ensure_started() {
            warn!("Failed to start relay bridge: {}", e);
        }
    }

    /// First frame of every relay stream
    pub fn meta_frame(&self) -> Value {
        let state = self.bridge.state();
        json!({
            "_meta": {
                "companion_url": self.config.base_url,
                "namespace": self.config.namespace,
                "path": self.config.stream_path,
                "connected": state.connected,
                "messages_seen": state.messages_seen,
            }
        })
    }
}

pub fn router(state: RelayState) -> Router {
    Router::new()
        .route("/telemetry/stream", get(telemetry_stream))
        .route("/telemetry/last", get(telemetry_last))
        .route("/telemetry/last-position", get(last_position))
        .route("/telemetry/bridge-status", get(bridge_status))
        .route("/telemetry/restart-bridge", post(restart_bridge))
        .with_state(state)
}

/// Payloads of the relay stream in delivery order: meta frame, last cached
/// event, then live events
pub fn relay_payloads(state: &RelayState) -> impl Stream<Item = String> + Send {
    let meta = state.meta_frame().to_string();
    let live = subscription_stream(state.bridge.events().subscribe_with_last())
        .map(|event| event.data().to_string());
    stream::once(async move { meta }).chain(live)
}

pub async fn telemetry_stream(
    State(state): State<RelayState>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    state.kick_bridge();
    debug!("Relay SSE client attached");

    let stream = relay_payloads(&state)
        .map(|data| Ok(sse_data(&data).event(RELAY_EVENT)));
    Sse::new(stream).keep_alive(keep_alive(state.keepalive))
}

/// Last republished payload, `{}` before the first one
pub async fn telemetry_last(State(state): State<RelayState>) -> Response {
    let body = state
        .bridge
        .last_event()
        .map(|event| event.data().to_string())
        .unwrap_or_else(|| "{}".to_string());
    ([(header::CONTENT_TYPE, "application/json")], body).into_response()
}

pub async fn last_position(State(state): State<RelayState>) -> Response {
    match state.bridge.last_position() {
        Some(position) => Json(position).into_response(),
        None => (StatusCode::NOT_FOUND, Json(json!({ "message": null }))).into_response(),
    }
}

pub async fn bridge_status(State(state): State<RelayState>) -> Response {
    let mut body = match serde_json::to_value(state.bridge.state()) {
        Ok(Value::Object(map)) => map,
        Ok(_) | Err(_) => {
            error!("Bridge state did not serialize to an object");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let position = state.bridge.last_position();
    body.insert("companion_base_url".into(), json!(state.config.base_url));
    body.insert("stream_url".into(), json!(state.config.stream_url()));
    body.insert("namespace".into(), json!(state.config.namespace));
    body.insert("path".into(), json!(state.config.stream_path));
    body.insert("have_position".into(), json!(position.is_some()));
    body.insert("last_position".into(), json!(position));

    Json(Value::Object(body)).into_response()
}

pub async fn restart_bridge(State(state): State<RelayState>) -> Response {
    match state.bridge.restart() {
        Ok(()) => Json(json!({ "ok": true })).into_response(),
        Err(e) => {
            error!("Failed to restart relay bridge: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "ok": false, "error": e.to_string() })),
            )
                .into_response()
        }
    }
}
