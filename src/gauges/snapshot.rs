//! Canonical gauge snapshot

use serde::{Deserialize, Serialize};

/// Normalized vehicle state published to consumers
///
/// Every field stays `None` until a frame that carries it has been folded in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GaugeSnapshot {
    /// Capture time, unix seconds
    pub timestamp: Option<f64>,

    // Attitude
    pub roll_deg: Option<f64>,
    pub pitch_deg: Option<f64>,
    pub yaw_deg: Option<f64>,
    pub heading_deg: Option<f64>,

    // Speeds, climb, throttle
    pub groundspeed_mps: Option<f64>,
    pub airspeed_mps: Option<f64>,
    pub climb_mps: Option<f64>,
    pub throttle_pct: Option<f64>,

    // Position and altitudes
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub alt_amsl_m: Option<f64>,
    pub alt_rel_m: Option<f64>,

    // GPS
    pub gps_fix_type: Option<i64>,
    pub gps_fix_name: Option<String>,
    pub gps_satellites: Option<i64>,

    // Battery
    pub batt_voltage_v: Option<f64>,
    pub batt_current_a: Option<f64>,
    pub batt_remaining_pct: Option<f64>,

    // Mode and arming
    pub mode: Option<String>,
    pub armed: Option<bool>,
}

impl GaugeSnapshot {
    /// Empty accumulator
    pub fn new() -> Self {
        Self::default()
    }

    /// Both coordinates, if both are present
    pub fn position(&self) -> Option<(f64, f64)> {
        Some((self.lat?, self.lon?))
    }
}
