//! Published events and the single publish call site

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};

use super::broadcaster::Broadcaster;

/// Periodic status with the sanitized gauges
pub const CHANNEL_STATUS: &str = "telemetry_status";

/// One-off warm-up snapshot with vehicle metadata
pub const CHANNEL_SNAPSHOT: &str = "gauge_snapshot";

/// Raw admitted frames
pub const CHANNEL_RAW: &str = "mavlink_message";

/// Generic fallback channel (the SSE default event name)
pub const CHANNEL_MESSAGE: &str = "message";

/// Connect/disconnect diagnostics
pub const CHANNEL_META: &str = "_meta";

/// Link lifecycle transitions reported on [`CHANNEL_META`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Connect,
    Disconnect,
}

impl Lifecycle {
    pub fn as_str(self) -> &'static str {
        match self {
            Lifecycle::Connect => "connect",
            Lifecycle::Disconnect => "disconnect",
        }
    }
}

/// A named, already serialized JSON payload
///
/// Clones share the underlying strings, so fanning one event out to many
/// queues never copies the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    channel: Arc<str>,
    data: Arc<str>,
}

impl Event {
    /// Event from a channel name and serialized JSON text
    pub fn new(channel: &str, data: impl Into<Arc<str>>) -> Self {
        Self {
            channel: Arc::from(channel),
            data: data.into(),
        }
    }

    /// Event from a JSON value
    pub fn json(channel: &str, value: &Value) -> Self {
        Self::new(channel, value.to_string())
    }

    /// `{"_meta":{"event":..,"ts":..}}` lifecycle event
    pub fn meta(kind: Lifecycle) -> Self {
        let ts = Utc::now().timestamp_millis() as f64 / 1000.0;
        Self::json(
            CHANNEL_META,
            &json!({ "_meta": { "event": kind.as_str(), "ts": ts } }),
        )
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn data(&self) -> &str {
        &self.data
    }

    /// Payload parsed back into JSON; non-JSON text becomes a JSON string
    pub fn payload(&self) -> Value {
        serde_json::from_str(&self.data).unwrap_or_else(|_| Value::String(self.data.to_string()))
    }
}

/// One publish call site feeding two independent broadcasters
///
/// Every event goes to the `events` broadcaster (SSE clients). Raw frames on
/// [`CHANNEL_RAW`] are additionally pushed to the `raw` broadcaster
/// (WebSocket clients).
#[derive(Debug, Clone)]
pub struct Publisher {
    events: Broadcaster<Event>,
    raw: Broadcaster<Event>,
}

impl Publisher {
    pub fn new(events: Broadcaster<Event>, raw: Broadcaster<Event>) -> Self {
        Self { events, raw }
    }

    /// Publisher with fresh broadcasters of the given capacities
    pub fn with_capacity(events_capacity: usize, raw_capacity: usize) -> Self {
        Self::new(Broadcaster::new(events_capacity), Broadcaster::new(raw_capacity))
    }

    pub fn publish(&self, event: Event) {
        if event.channel() == CHANNEL_RAW {
            self.raw.publish(event.clone());
        }
        self.events.publish(event);
    }

    pub fn events(&self) -> &Broadcaster<Event> {
        &self.events
    }

    pub fn raw(&self) -> &Broadcaster<Event> {
        &self.raw
    }
}
