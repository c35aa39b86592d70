//! # Frame Normalizer
//!
//! Folds decoded frames into a [`GaugeSnapshot`] accumulator.
//!
//! Dispatch is on the frame's type tag only. Each field is converted on its
//! own: a missing or malformed field leaves the matching gauge untouched and
//! the rest of the frame is still folded.

use super::sanitizer::wrap_heading;
use super::snapshot::GaugeSnapshot;
use crate::mav::tables::{flight_mode_name, gps_fix_name, MAV_MODE_FLAG_SAFETY_ARMED};
use crate::mav::Frame;

/// Fixed-point scale of MAVLink latitude/longitude (degE7)
pub const LATLON_SCALE: f64 = 1e7;

/// Fixed-point scale of MAVLink altitudes (mm)
pub const ALT_SCALE: f64 = 1e3;

/// SYS_STATUS.current_battery "unknown" marker
const CURRENT_UNKNOWN: i64 = -1;

/// SYS_STATUS.battery_remaining "unknown" marker, unsigned and signed readings
const REMAINING_UNKNOWN: [i64; 2] = [255, -1];

/// Frame types the normalizer understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Heartbeat,
    Attitude,
    VfrHud,
    GlobalPositionInt,
    GpsRawInt,
    SysStatus,
    AutopilotVersion,
    Other,
}

impl FrameKind {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "HEARTBEAT" => FrameKind::Heartbeat,
            "ATTITUDE" => FrameKind::Attitude,
            "VFR_HUD" => FrameKind::VfrHud,
            "GLOBAL_POSITION_INT" => FrameKind::GlobalPositionInt,
            "GPS_RAW_INT" => FrameKind::GpsRawInt,
            "SYS_STATUS" => FrameKind::SysStatus,
            "AUTOPILOT_VERSION" => FrameKind::AutopilotVersion,
            _ => FrameKind::Other,
        }
    }

    pub fn of(frame: &Frame) -> Self {
        Self::from_tag(frame.msg_type())
    }
}

/// Fold one frame into the accumulator
///
/// Unrecognized frames (including `BAD_DATA`) are ignored.
pub fn fold(gauges: &mut GaugeSnapshot, frame: &Frame) {
    match FrameKind::of(frame) {
        FrameKind::Heartbeat => fold_heartbeat(gauges, frame),
        FrameKind::Attitude => fold_attitude(gauges, frame),
        FrameKind::VfrHud => fold_vfr_hud(gauges, frame),
        FrameKind::GlobalPositionInt => fold_global_position(gauges, frame),
        FrameKind::GpsRawInt => fold_gps_raw(gauges, frame),
        FrameKind::SysStatus => fold_sys_status(gauges, frame),
        FrameKind::AutopilotVersion | FrameKind::Other => {}
    }
}

fn fold_heartbeat(g: &mut GaugeSnapshot, frame: &Frame) {
    let Some(base_mode) = frame.int("base_mode") else {
        return;
    };

    if let Some(custom_mode) = frame.int("custom_mode").and_then(|v| u32::try_from(v).ok()) {
        let mav_type = frame.int("type").unwrap_or(0);
        let autopilot = frame.int("autopilot").unwrap_or(0);
        g.mode = Some(flight_mode_name(mav_type, autopilot, base_mode, custom_mode));
    }

    g.armed = Some(base_mode & MAV_MODE_FLAG_SAFETY_ARMED != 0);
}

fn fold_attitude(g: &mut GaugeSnapshot, frame: &Frame) {
    if let Some(roll) = frame.float("roll") {
        g.roll_deg = Some(roll.to_degrees());
    }
    if let Some(pitch) = frame.float("pitch") {
        g.pitch_deg = Some(pitch.to_degrees());
    }
    if let Some(yaw) = frame.float("yaw") {
        g.yaw_deg = Some(wrap_heading(yaw.to_degrees()));
    }
    if g.heading_deg.is_none() {
        g.heading_deg = g.yaw_deg;
    }
}

fn fold_vfr_hud(g: &mut GaugeSnapshot, frame: &Frame) {
    if let Some(v) = frame.float("groundspeed") {
        g.groundspeed_mps = Some(v);
    }
    if let Some(v) = frame.float("airspeed") {
        g.airspeed_mps = Some(v);
    }
    if let Some(v) = frame.float("climb") {
        g.climb_mps = Some(v);
    }
    if let Some(v) = frame.float("throttle") {
        g.throttle_pct = Some(v);
    }
    if let Some(heading) = frame.float("heading") {
        g.heading_deg = Some(wrap_heading(heading));
    }
}

fn fold_global_position(g: &mut GaugeSnapshot, frame: &Frame) {
    if let (Some(lat), Some(lon)) = (frame.float("lat"), frame.float("lon")) {
        g.lat = Some(lat / LATLON_SCALE);
        g.lon = Some(lon / LATLON_SCALE);
    }
    if let Some(alt) = frame.float("alt") {
        g.alt_amsl_m = Some(alt / ALT_SCALE);
    }
    if let Some(rel) = frame.float("relative_alt") {
        g.alt_rel_m = Some(rel / ALT_SCALE);
    }
}

fn fold_gps_raw(g: &mut GaugeSnapshot, frame: &Frame) {
    if let Some(fix) = frame.int("fix_type") {
        g.gps_fix_type = Some(fix);
        g.gps_fix_name = gps_fix_name(fix);
    }
    if let Some(sats) = frame.int("satellites_visible") {
        g.gps_satellites = Some(sats);
    }
}

fn fold_sys_status(g: &mut GaugeSnapshot, frame: &Frame) {
    if let Some(mv) = frame.int("voltage_battery") {
        if mv >= 0 {
            g.batt_voltage_v = Some(mv as f64 / 1000.0);
        }
    }
    if let Some(ca) = frame.int("current_battery") {
        if ca != CURRENT_UNKNOWN {
            g.batt_current_a = Some(ca as f64 / 100.0);
        }
    }
    if let Some(pct) = frame.int("battery_remaining") {
        if !REMAINING_UNKNOWN.contains(&pct) {
            g.batt_remaining_pct = Some(pct as f64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: Option<f64>, b: f64) -> bool {
        a.map(|a| (a - b).abs() < 1e-6).unwrap_or(false)
    }

    #[test]
    fn test_frame_kind_from_tag() {
        assert_eq!(FrameKind::from_tag("HEARTBEAT"), FrameKind::Heartbeat);
        assert_eq!(FrameKind::from_tag("VFR_HUD"), FrameKind::VfrHud);
        assert_eq!(FrameKind::from_tag("BAD_DATA"), FrameKind::Other);
        assert_eq!(FrameKind::from_tag("heartbeat"), FrameKind::Other);
    }

    #[test]
    fn test_unknown_frame_is_noop() {
        let mut g = GaugeSnapshot::new();
        fold(&mut g, &Frame::new("BAD_DATA").with("lat", 1));
        fold(&mut g, &Frame::new("RC_CHANNELS").with("chan1_raw", 1500));
        assert_eq!(g, GaugeSnapshot::new());
    }

    #[test]
    fn test_heartbeat_mode_and_armed() {
        let mut g = GaugeSnapshot::new();
        let hb = Frame::new("HEARTBEAT")
            .with("type", 2)
            .with("autopilot", 3)
            .with("base_mode", 128 | 1)
            .with("custom_mode", 5);
        fold(&mut g, &hb);
        assert_eq!(g.mode.as_deref(), Some("LOITER"));
        assert_eq!(g.armed, Some(true));

        let hb = Frame::new("HEARTBEAT")
            .with("type", 2)
            .with("autopilot", 3)
            .with("base_mode", 1)
            .with("custom_mode", 9);
        fold(&mut g, &hb);
        assert_eq!(g.mode.as_deref(), Some("LAND"));
        assert_eq!(g.armed, Some(false));
    }

    #[test]
    fn test_heartbeat_without_base_mode_is_ignored() {
        let mut g = GaugeSnapshot::new();
        fold(&mut g, &Frame::new("HEARTBEAT").with("type", 2).with("custom_mode", 5));
        assert!(g.mode.is_none());
        assert!(g.armed.is_none());
    }

    #[test]
    fn test_attitude_converts_to_degrees() {
        let mut g = GaugeSnapshot::new();
        let att = Frame::new("ATTITUDE")
            .with("roll", std::f64::consts::FRAC_PI_6)
            .with("pitch", -std::f64::consts::FRAC_PI_4)
            .with("yaw", -std::f64::consts::FRAC_PI_2);
        fold(&mut g, &att);
        assert!(approx(g.roll_deg, 30.0));
        assert!(approx(g.pitch_deg, -45.0));
        assert!(approx(g.yaw_deg, 270.0));
        assert!(approx(g.heading_deg, 270.0));
    }

    #[test]
    fn test_attitude_does_not_override_hud_heading() {
        let mut g = GaugeSnapshot::new();
        fold(&mut g, &Frame::new("VFR_HUD").with("heading", 90));
        fold(&mut g, &Frame::new("ATTITUDE").with("yaw", 0.0));
        assert!(approx(g.heading_deg, 90.0));
        assert!(approx(g.yaw_deg, 0.0));
    }

    #[test]
    fn test_vfr_hud() {
        let mut g = GaugeSnapshot::new();
        let hud = Frame::new("VFR_HUD")
            .with("groundspeed", 12.5f32)
            .with("airspeed", 13.0f32)
            .with("climb", -0.5f32)
            .with("throttle", 42)
            .with("heading", 370);
        fold(&mut g, &hud);
        assert!(approx(g.groundspeed_mps, 12.5));
        assert!(approx(g.airspeed_mps, 13.0));
        assert!(approx(g.climb_mps, -0.5));
        assert!(approx(g.throttle_pct, 42.0));
        assert!(approx(g.heading_deg, 10.0));
    }

    #[test]
    fn test_global_position_scaling() {
        let mut g = GaugeSnapshot::new();
        let pos = Frame::new("GLOBAL_POSITION_INT")
            .with("lat", 372_400_000)
            .with("lon", -1_157_900_000)
            .with("alt", 137_000)
            .with("relative_alt", 12_500);
        fold(&mut g, &pos);
        assert!(approx(g.lat, 37.24));
        assert!(approx(g.lon, -115.79));
        assert!(approx(g.alt_amsl_m, 137.0));
        assert!(approx(g.alt_rel_m, 12.5));
    }

    #[test]
    fn test_global_position_partial_fields() {
        let mut g = GaugeSnapshot::new();
        fold(&mut g, &Frame::new("GLOBAL_POSITION_INT").with("lat", 10).with("alt", 2000));
        assert!(g.lat.is_none());
        assert!(g.lon.is_none());
        assert!(approx(g.alt_amsl_m, 2.0));
    }

    #[test]
    fn test_bad_field_does_not_abort_frame() {
        let mut g = GaugeSnapshot::new();
        let pos = Frame::new("GLOBAL_POSITION_INT")
            .with("lat", "garbage")
            .with("lon", 10)
            .with("relative_alt", 5000);
        fold(&mut g, &pos);
        assert!(g.lat.is_none());
        assert!(approx(g.alt_rel_m, 5.0));
    }

    #[test]
    fn test_gps_raw() {
        let mut g = GaugeSnapshot::new();
        fold(&mut g, &Frame::new("GPS_RAW_INT").with("fix_type", 3).with("satellites_visible", 11));
        assert_eq!(g.gps_fix_type, Some(3));
        assert_eq!(g.gps_fix_name.as_deref(), Some("GPS_FIX_TYPE_3D_FIX"));
        assert_eq!(g.gps_satellites, Some(11));

        fold(&mut g, &Frame::new("GPS_RAW_INT").with("fix_type", 42));
        assert_eq!(g.gps_fix_type, Some(42));
        assert!(g.gps_fix_name.is_none());
        assert_eq!(g.gps_satellites, Some(11));
    }

    #[test]
    fn test_sys_status() {
        let mut g = GaugeSnapshot::new();
        let status = Frame::new("SYS_STATUS")
            .with("voltage_battery", 12_600)
            .with("current_battery", 1_250)
            .with("battery_remaining", 87);
        fold(&mut g, &status);
        assert!(approx(g.batt_voltage_v, 12.6));
        assert!(approx(g.batt_current_a, 12.5));
        assert!(approx(g.batt_remaining_pct, 87.0));
    }

    #[test]
    fn test_sys_status_sentinels_keep_previous() {
        let mut g = GaugeSnapshot::new();
        fold(
            &mut g,
            &Frame::new("SYS_STATUS")
                .with("voltage_battery", 12_000)
                .with("current_battery", 300)
                .with("battery_remaining", 50),
        );
        fold(
            &mut g,
            &Frame::new("SYS_STATUS")
                .with("voltage_battery", -1)
                .with("current_battery", -1)
                .with("battery_remaining", 255),
        );
        fold(&mut g, &Frame::new("SYS_STATUS").with("battery_remaining", -1));
        assert!(approx(g.batt_voltage_v, 12.0));
        assert!(approx(g.batt_current_a, 3.0));
        assert!(approx(g.batt_remaining_pct, 50.0));
    }
}
