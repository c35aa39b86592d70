//! # MAVLink Lookup Tables
//!
//! Turns raw MAVLink codes into the labels published in gauge snapshots.
//! Names come from the `mavlink` dialect enums; only PX4's packed custom
//! modes, which no dialect defines, are tabled here.

use std::fmt::Debug;

use mavlink::ardupilotmega::{CopterMode, PlaneMode, RoverMode, SubMode, TrackerMode};
use mavlink::common::{GpsFixType, MavAutopilot, MavModeFlag, MavType};
use num_traits::FromPrimitive;

/// MAV_MODE_FLAG_SAFETY_ARMED bit of HEARTBEAT.base_mode
pub const MAV_MODE_FLAG_SAFETY_ARMED: i64 = MavModeFlag::MAV_MODE_FLAG_SAFETY_ARMED.bits() as i64;

/// MAV_MODE_FLAG_CUSTOM_MODE_ENABLED bit of HEARTBEAT.base_mode
pub const MAV_MODE_FLAG_CUSTOM_MODE_ENABLED: i64 =
    MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED.bits() as i64;

pub const MAV_AUTOPILOT_PX4: i64 = MavAutopilot::MAV_AUTOPILOT_PX4 as i64;

pub const MAV_TYPE_QUADROTOR: u8 = MavType::MAV_TYPE_QUADROTOR as u8;

pub const MAV_TYPE_GCS: u8 = MavType::MAV_TYPE_GCS as u8;

/// Dialect enum variant name for a wire code, with `prefix` stripped
fn enum_name<E: FromPrimitive + Debug>(code: i64, prefix: &str) -> Option<String> {
    let name = format!("{:?}", E::from_i64(code)?);
    Some(name.strip_prefix(prefix).unwrap_or(&name).to_string())
}

const PX4_MAIN_MODES: &[(u32, &str)] = &[
    (1, "MANUAL"),
    (2, "ALTCTL"),
    (3, "POSCTL"),
    (4, "AUTO"),
    (5, "ACRO"),
    (6, "OFFBOARD"),
    (7, "STABILIZED"),
    (8, "RATTITUDE"),
];

const PX4_AUTO_SUB_MODES: &[(u32, &str)] = &[
    (1, "READY"),
    (2, "TAKEOFF"),
    (3, "LOITER"),
    (4, "MISSION"),
    (5, "RTL"),
    (6, "LAND"),
    (8, "FOLLOWME"),
    (9, "PRECLAND"),
];

/// Vehicle classes that share an ArduPilot mode enum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VehicleClass {
    Copter,
    Plane,
    Rover,
    Sub,
    Tracker,
    Other,
}

impl VehicleClass {
    /// Classify a MAV_TYPE value
    pub fn from_mav_type(mav_type: i64) -> Self {
        match mav_type {
            2 | 3 | 4 | 13 | 14 | 15 | 29 | 35 => VehicleClass::Copter,
            1 | 19 | 20 | 21 => VehicleClass::Plane,
            10 | 11 => VehicleClass::Rover,
            12 => VehicleClass::Sub,
            5 => VehicleClass::Tracker,
            _ => VehicleClass::Other,
        }
    }

    /// ArduPilot mode name for `custom_mode` on this class of vehicle
    fn mode_name(self, custom_mode: u32) -> Option<String> {
        let code = i64::from(custom_mode);
        match self {
            VehicleClass::Copter => enum_name::<CopterMode>(code, "COPTER_MODE_"),
            VehicleClass::Plane => enum_name::<PlaneMode>(code, "PLANE_MODE_"),
            VehicleClass::Rover => enum_name::<RoverMode>(code, "ROVER_MODE_"),
            VehicleClass::Sub => enum_name::<SubMode>(code, "SUB_MODE_"),
            VehicleClass::Tracker => enum_name::<TrackerMode>(code, "TRACKER_MODE_"),
            VehicleClass::Other => None,
        }
    }
}

fn lookup(table: &[(u32, &'static str)], code: u32) -> Option<&'static str> {
    table.iter().find(|(c, _)| *c == code).map(|(_, name)| *name)
}

/// Name of a MAV_TYPE value, e.g. `2` -> `"MAV_TYPE_QUADROTOR"`
pub fn mav_type_name(mav_type: i64) -> Option<String> {
    enum_name::<MavType>(mav_type, "")
}

/// Name of a GPS_FIX_TYPE value, e.g. `3` -> `"GPS_FIX_TYPE_3D_FIX"`
pub fn gps_fix_name(fix_type: i64) -> Option<String> {
    enum_name::<GpsFixType>(fix_type, "")
}

/// Flight mode label for a heartbeat
///
/// PX4 packs main/sub mode into the upper bytes of `custom_mode`; ArduPilot
/// uses a per-vehicle mode enum keyed by `custom_mode`. Unknown combinations fall
/// back to `Mode(0x..)` for a cleared custom-mode flag and `Mode(n)`
/// otherwise.
pub fn flight_mode_name(mav_type: i64, autopilot: i64, base_mode: i64, custom_mode: u32) -> String {
    if autopilot == MAV_AUTOPILOT_PX4 {
        return px4_mode_name(base_mode, custom_mode);
    }

    if base_mode & MAV_MODE_FLAG_CUSTOM_MODE_ENABLED == 0 {
        return format!("Mode(0x{:08x})", base_mode);
    }

    VehicleClass::from_mav_type(mav_type)
        .mode_name(custom_mode)
        .unwrap_or_else(|| format!("Mode({})", custom_mode))
}

fn px4_mode_name(base_mode: i64, custom_mode: u32) -> String {
    if base_mode & MAV_MODE_FLAG_CUSTOM_MODE_ENABLED == 0 {
        return format!("Mode(0x{:08x})", base_mode);
    }

    let main_mode = (custom_mode >> 16) & 0xFF;
    let sub_mode = (custom_mode >> 24) & 0xFF;

    match lookup(PX4_MAIN_MODES, main_mode) {
        Some("AUTO") => match lookup(PX4_AUTO_SUB_MODES, sub_mode) {
            Some(sub) => sub.to_string(),
            None => "AUTO".to_string(),
        },
        Some(name) => name.to_string(),
        None => format!("Mode({})", custom_mode),
    }
}

/// Firmware label from AUTOPILOT_VERSION.flight_sw_version
///
/// Layout per the MAVLink AUTOPILOT_VERSION definition: major in bits 24-31,
/// minor in 16-23, patch in 8-15, release type in 0-7 (not shown). Deliberately
/// not the `(v >> 8)`-as-major decoding some ground stations use.
pub fn firmware_label(flight_sw_version: u32) -> String {
    let major = (flight_sw_version >> 24) & 0xFF;
    let minor = (flight_sw_version >> 16) & 0xFF;
    let patch = (flight_sw_version >> 8) & 0xFF;
    format!("{}.{}.{}", major, minor, patch)
}
