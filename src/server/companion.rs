//! Companion-side routes: the live feed produced by the listener

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::sse::{Event as SseEvent, Sse};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures::stream::{Stream, StreamExt};
use serde_json::{json, Value};
use tracing::debug;

use super::{keep_alive, sse_data, subscription_stream};
use crate::config::{LinkConfig, ServerConfig};
use crate::fanout::{Event, Publisher, Subscription};

pub const STREAM_PATH: &str = "/telemetry/stream";
pub const WS_PATH: &str = "/ws/telemetry";

/// Shared state of the companion routes
#[derive(Clone)]
pub struct CompanionState {
    pub publisher: Publisher,
    pub link: LinkConfig,
    pub keepalive: Duration,
}

impl CompanionState {
    pub fn new(publisher: Publisher, link: &LinkConfig, server: &ServerConfig) -> Self {
        Self {
            publisher,
            link: link.clone(),
            keepalive: Duration::from_secs(server.keepalive_s),
        }
    }
}

pub fn router(state: CompanionState) -> Router {
    Router::new()
        .route(STREAM_PATH, get(telemetry_stream))
        .route(WS_PATH, get(telemetry_ws))
        .route("/config", get(link_config))
        .route("/socket-health", get(socket_health))
        .with_state(state)
}

fn to_sse(event: Event) -> SseEvent {
    sse_data(event.data()).event(event.channel())
}

/// Every published event, named by channel, last cached event first
pub async fn telemetry_stream(
    State(state): State<CompanionState>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let sub = state.publisher.events().subscribe_with_last();
    debug!("SSE client attached as subscriber {}", sub.id());

    let stream = subscription_stream(sub).map(|event| Ok(to_sse(event)));
    Sse::new(stream).keep_alive(keep_alive(state.keepalive))
}

/// Raw frames as WebSocket text messages, last raw frame first
pub async fn telemetry_ws(
    ws: WebSocketUpgrade,
    State(state): State<CompanionState>,
) -> impl IntoResponse {
    let sub = state.publisher.raw().subscribe_with_last();
    ws.on_upgrade(move |socket| forward_raw(socket, sub))
}

async fn forward_raw(mut socket: WebSocket, mut sub: Subscription<Event>) {
    debug!("WebSocket client attached as subscriber {}", sub.id());

    loop {
        tokio::select! {
            event = sub.recv() => {
                let Some(event) = event else { break };
                if socket.send(Message::Text(event.data().to_string())).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    debug!("WebSocket subscriber {} detached", sub.id());
}

/// Description of the link; doubles as the relay's reachability target
pub async fn link_config(State(state): State<CompanionState>) -> Json<Value> {
    Json(json!({
        "link_url": state.link.url,
        "publish_rate_hz": state.link.publish_rate_hz,
        "target_mav_type": state.link.target_mav_type,
        "forward_raw_frames": state.link.forward_raw_frames,
        "sse": STREAM_PATH,
        "ws": WS_PATH,
    }))
}

pub async fn socket_health(State(state): State<CompanionState>) -> Json<Value> {
    let subscribers =
        state.publisher.events().subscriber_count() + state.publisher.raw().subscriber_count();
    Json(json!({
        "sse": STREAM_PATH,
        "ws": WS_PATH,
        "status": "up",
        "subscribers": subscribers,
    }))
}
