//! # Decoded Frames
//!
//! A [`Frame`] is one decoded MAVLink message reduced to its type tag, the
//! sending system id and a map of named fields. The gauge normalizer only
//! ever reads frames through the typed accessors here, so a field that is
//! missing or carries the wrong kind of value is simply absent to it.

use std::collections::BTreeMap;

use mavlink::common::MavMessage;
use mavlink::{MavHeader, Message};
use serde::Serialize;
use serde_json::{json, Map, Value};

/// Key carrying the type tag in the JSON rendering of a frame
pub const JSON_TYPE_KEY: &str = "mavpackettype";

/// Key carrying the source system id in the JSON rendering of a frame
pub const JSON_SYSID_KEY: &str = "sysid";

/// One named field value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Int(i64),
    Float(f64),
    Text(String),
}

macro_rules! field_from_int {
    ($($t:ty),*) => {
        $(impl From<$t> for FieldValue {
            fn from(v: $t) -> Self { FieldValue::Int(v as i64) }
        })*
    };
}

field_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<u64> for FieldValue {
    fn from(v: u64) -> Self {
        match i64::try_from(v) {
            Ok(v) => FieldValue::Int(v),
            Err(_) => FieldValue::Float(v as f64),
        }
    }
}

impl From<f32> for FieldValue {
    fn from(v: f32) -> Self {
        FieldValue::Float(v as f64)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Text(v)
    }
}

/// A decoded protocol frame
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    msg_type: String,
    src_system: Option<u8>,
    fields: BTreeMap<String, FieldValue>,
}

impl Frame {
    /// Create an empty frame with the given type tag (e.g. `"HEARTBEAT"`)
    pub fn new(msg_type: impl Into<String>) -> Self {
        Self {
            msg_type: msg_type.into(),
            src_system: None,
            fields: BTreeMap::new(),
        }
    }

    /// Set the source system id
    pub fn from_system(mut self, system_id: u8) -> Self {
        self.src_system = Some(system_id);
        self
    }

    /// Add a named field
    pub fn with(mut self, name: &str, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    pub fn msg_type(&self) -> &str {
        &self.msg_type
    }

    pub fn src_system(&self) -> Option<u8> {
        self.src_system
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Integer field. Integral finite floats are accepted as well.
    pub fn int(&self, name: &str) -> Option<i64> {
        match self.fields.get(name)? {
            FieldValue::Int(v) => Some(*v),
            FieldValue::Float(v) if v.is_finite() && v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }

    /// Numeric field as `f64`. Non-finite values read as absent.
    pub fn float(&self, name: &str) -> Option<f64> {
        match self.fields.get(name)? {
            FieldValue::Int(v) => Some(*v as f64),
            FieldValue::Float(v) if v.is_finite() => Some(*v),
            _ => None,
        }
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        match self.fields.get(name)? {
            FieldValue::Text(v) => Some(v),
            _ => None,
        }
    }

    /// JSON object with the type tag under `mavpackettype`, the source
    /// system under `sysid` and every field by name.
    pub fn to_json(&self) -> Value {
        let mut obj = Map::new();
        obj.insert(JSON_TYPE_KEY.to_string(), json!(self.msg_type));
        if let Some(sysid) = self.src_system {
            obj.insert(JSON_SYSID_KEY.to_string(), json!(sysid));
        }
        for (name, value) in &self.fields {
            let value = match value {
                FieldValue::Float(v) if !v.is_finite() => Value::Null,
                other => json!(other),
            };
            obj.insert(name.clone(), value);
        }
        Value::Object(obj)
    }

    /// Reduce a typed MAVLink message to a frame.
    ///
    /// Only the messages the gauges and the relay read are expanded into
    /// fields; everything else keeps just its type tag and source.
    pub fn from_mavlink(header: &MavHeader, msg: &MavMessage) -> Self {
        let frame = Frame::new(msg.message_name()).from_system(header.system_id);

        match msg {
            MavMessage::HEARTBEAT(hb) => frame
                .with("type", hb.mavtype as u8)
                .with("autopilot", hb.autopilot as u8)
                .with("base_mode", hb.base_mode.bits())
                .with("custom_mode", hb.custom_mode)
                .with("system_status", hb.system_status as u8)
                .with("mavlink_version", hb.mavlink_version),
            MavMessage::ATTITUDE(att) => frame
                .with("time_boot_ms", att.time_boot_ms)
                .with("roll", att.roll)
                .with("pitch", att.pitch)
                .with("yaw", att.yaw)
                .with("rollspeed", att.rollspeed)
                .with("pitchspeed", att.pitchspeed)
                .with("yawspeed", att.yawspeed),
            MavMessage::VFR_HUD(hud) => frame
                .with("airspeed", hud.airspeed)
                .with("groundspeed", hud.groundspeed)
                .with("alt", hud.alt)
                .with("climb", hud.climb)
                .with("heading", hud.heading)
                .with("throttle", hud.throttle),
            MavMessage::GLOBAL_POSITION_INT(pos) => frame
                .with("time_boot_ms", pos.time_boot_ms)
                .with("lat", pos.lat)
                .with("lon", pos.lon)
                .with("alt", pos.alt)
                .with("relative_alt", pos.relative_alt)
                .with("vx", pos.vx)
                .with("vy", pos.vy)
                .with("vz", pos.vz)
                .with("hdg", pos.hdg),
            MavMessage::GPS_RAW_INT(gps) => frame
                .with("time_usec", gps.time_usec)
                .with("lat", gps.lat)
                .with("lon", gps.lon)
                .with("alt", gps.alt)
                .with("eph", gps.eph)
                .with("epv", gps.epv)
                .with("vel", gps.vel)
                .with("cog", gps.cog)
                .with("fix_type", gps.fix_type as u8)
                .with("satellites_visible", gps.satellites_visible),
            MavMessage::SYS_STATUS(status) => {
                let mut frame = frame
                    .with("load", status.load)
                    .with("current_battery", status.current_battery)
                    .with("battery_remaining", status.battery_remaining)
                    .with("drop_rate_comm", status.drop_rate_comm);
                // UINT16_MAX is the wire's "unknown" marker for voltage
                if status.voltage_battery != u16::MAX {
                    frame = frame.with("voltage_battery", status.voltage_battery);
                }
                frame
            }
            MavMessage::AUTOPILOT_VERSION(ver) => frame
                .with("flight_sw_version", ver.flight_sw_version)
                .with("board_version", ver.board_version)
                .with("vendor_id", ver.vendor_id)
                .with("product_id", ver.product_id),
            _ => frame,
        }
    }
}
