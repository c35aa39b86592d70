//! # Snapshot Sanitizer
//!
//! Turns the live accumulator into a value that is safe to publish.
//!
//! Rules, in order:
//! 1. Clear both coordinates if either is missing, both sit on the 0/0
//!    "no fix" sentinel, either is out of geodetic range, or the GPS reports
//!    less than a 2-D fix
//! 2. Wrap heading into `[0, 360)`
//! 3. Clamp throttle into `[0, 100]`
//! 4. Stamp the capture time

use chrono::{DateTime, Utc};

use super::snapshot::GaugeSnapshot;

/// Magnitude below which a coordinate counts as zero
pub const NULL_ISLAND_EPSILON: f64 = 1e-9;

/// Lowest GPS_FIX_TYPE that still backs a published position (2-D fix)
pub const MIN_FIX_TYPE: i64 = 2;

/// Wrap an angle in degrees into `[0, 360)`
pub fn wrap_heading(deg: f64) -> f64 {
    let h = deg.rem_euclid(360.0);
    // rem_euclid rounds tiny negative inputs up to exactly 360.0
    if h >= 360.0 {
        0.0
    } else {
        h
    }
}

fn position_is_valid(g: &GaugeSnapshot) -> bool {
    let Some((lat, lon)) = g.position() else {
        return false;
    };
    if lat.abs() < NULL_ISLAND_EPSILON && lon.abs() < NULL_ISLAND_EPSILON {
        return false;
    }
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        return false;
    }
    // An unknown fix type does not veto the position; a known bad one does.
    !matches!(g.gps_fix_type, Some(fix) if fix < MIN_FIX_TYPE)
}

/// Sanitized copy stamped with `now`
pub fn sanitize_at(gauges: &GaugeSnapshot, now: DateTime<Utc>) -> GaugeSnapshot {
    let mut g = gauges.clone();

    if !position_is_valid(&g) {
        g.lat = None;
        g.lon = None;
    }

    g.heading_deg = g.heading_deg.map(wrap_heading);
    g.throttle_pct = g.throttle_pct.map(|t| t.clamp(0.0, 100.0));
    g.timestamp = Some(now.timestamp_millis() as f64 / 1000.0);
    g
}

/// Sanitized copy stamped with the current time
pub fn sanitize(gauges: &GaugeSnapshot) -> GaugeSnapshot {
    sanitize_at(gauges, Utc::now())
}
