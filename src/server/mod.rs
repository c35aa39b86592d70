//! # Server Module
//!
//! HTTP surfaces of the two subsystems, built on `axum`.
//!
//! This module handles:
//! - The companion feed: SSE stream, WebSocket raw feed, link description
//! - The relay feed: SSE stream plus status and admin endpoints
//! - Turning broadcaster subscriptions into response streams

pub mod companion;
pub mod relay;

use std::time::Duration;

use axum::response::sse::{Event as SseEvent, KeepAlive};
use axum::Router;
use futures::stream::{self, Stream};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::error::Result;
use crate::fanout::{Event, Subscription};
use crate::shutdown::Shutdown;

/// Comment text of SSE keep-alives
pub const KEEPALIVE_TEXT: &str = "ping";

/// Keep-alive comment sent after `interval` without events
pub fn keep_alive(interval: Duration) -> KeepAlive {
    KeepAlive::new().interval(interval).text(KEEPALIVE_TEXT)
}

/// SSE frame carrying `data`, with CR and CRLF turned into LF
///
/// `axum` rejects a carriage return inside `data`; a line break becomes a
/// second `data:` line instead.
pub fn sse_data(data: &str) -> SseEvent {
    let event = SseEvent::default();
    if data.contains('\r') {
        event.data(data.replace("\r\n", "\n").replace('\r', "\n"))
    } else {
        event.data(data)
    }
}

/// Events of a subscription as a stream; ends when the subscriber is detached.
///
/// Dropping the stream (client gone) drops the subscription, which removes it
/// from its broadcaster.
pub fn subscription_stream(sub: Subscription<Event>) -> impl Stream<Item = Event> + Send {
    stream::unfold(sub, |mut sub| async move {
        let event = sub.recv().await?;
        Some((event, sub))
    })
}

/// Resolves on Ctrl+C or once `shutdown` is triggered by someone else.
/// Either way every other holder of `shutdown` is woken.
pub async fn shutdown_signal(shutdown: Shutdown) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!("Failed to listen for Ctrl+C: {}", e);
            }
            info!("Received Ctrl+C, shutting down");
        }
        _ = shutdown.wait() => {}
    }

    shutdown.trigger();
}

/// Bind `addr` and serve `router` until shutdown
///
/// # Errors
///
/// Returns `Io` if the address cannot be bound or the server fails.
pub async fn serve(router: Router, addr: &str, shutdown: Shutdown) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    info!("HTTP server stopped");
    Ok(())
}
