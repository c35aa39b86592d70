//! Relay bridge state and the last-known-position parser

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;

use crate::gauges::normalizer::{ALT_SCALE, LATLON_SCALE};

/// Connection status of the relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgeStatus {
    Disconnected,
    Connecting,
    Connected,
}

/// Counters and flags read by the status endpoints
#[derive(Debug, Clone, Serialize)]
pub struct BridgeState {
    pub status: BridgeStatus,
    pub connected: bool,
    /// Last value seen on the status channel
    pub telemetry_status: Option<Value>,
    /// Unix seconds of the last upstream event
    pub last_msg_ts: Option<f64>,
    pub errors: u64,
    pub messages_seen: u64,
    pub positions_seen: u64,
    pub connections: u64,
    pub last_error: Option<String>,
}

impl Default for BridgeState {
    fn default() -> Self {
        Self {
            status: BridgeStatus::Disconnected,
            connected: false,
            telemetry_status: None,
            last_msg_ts: None,
            errors: 0,
            messages_seen: 0,
            positions_seen: 0,
            connections: 0,
            last_error: None,
        }
    }
}

impl BridgeState {
    pub fn set_status(&mut self, status: BridgeStatus) {
        self.status = status;
        self.connected = status == BridgeStatus::Connected;
    }

    /// Count one upstream event
    pub fn record_message(&mut self) {
        self.messages_seen += 1;
        self.last_msg_ts = Some(now_secs());
    }

    /// Count one transport failure and drop to `Disconnected`
    pub fn record_error(&mut self, error: impl ToString) {
        self.errors += 1;
        self.last_error = Some(error.to_string());
        self.set_status(BridgeStatus::Disconnected);
    }
}

/// Where a cached position came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PositionSource {
    /// GLOBAL_POSITION_INT
    #[serde(rename = "GPI")]
    GlobalPosition,
    /// GPS_RAW_INT
    #[serde(rename = "GPS")]
    GpsRaw,
}

/// Last known vehicle position seen by the relay
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LastPosition {
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
    pub src: PositionSource,
    pub ts: f64,
}

fn now_secs() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

/// Pull a position out of an upstream payload, if it carries one.
///
/// Accepts a bare frame object or one wrapped as `{"message": {...}}`, with
/// the type under `mavpackettype`, `type` or `msgname`. Anything else, or a
/// frame without numeric `lat`/`lon`, yields `None`.
pub fn parse_position(payload: &Value) -> Option<LastPosition> {
    let frame = match payload.get("message") {
        Some(inner) => inner,
        None => payload,
    };
    let obj = frame.as_object()?;

    let msg_type = ["mavpackettype", "type", "msgname"]
        .iter()
        .find_map(|key| obj.get(*key).and_then(Value::as_str))?;

    let (src, alt) = match msg_type {
        "GLOBAL_POSITION_INT" => (
            PositionSource::GlobalPosition,
            obj.get("relative_alt").or_else(|| obj.get("alt")),
        ),
        "GPS_RAW_INT" => (PositionSource::GpsRaw, obj.get("alt")),
        _ => return None,
    };

    let lat = obj.get("lat")?.as_f64()?;
    let lon = obj.get("lon")?.as_f64()?;
    let alt = alt.and_then(Value::as_f64).unwrap_or(0.0);

    Some(LastPosition {
        lat: lat / LATLON_SCALE,
        lon: lon / LATLON_SCALE,
        alt: alt / ALT_SCALE,
        src,
        ts: now_secs(),
    })
}
