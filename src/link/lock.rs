//! # Vehicle Lock
//!
//! Commits a listener session to one source system.
//!
//! A shared link can carry traffic from several systems (ground station
//! echoes, other vehicles). The first system that announces the target
//! vehicle type in a HEARTBEAT becomes the locked vehicle for the rest of the
//! session; frames from other known systems are filtered out from then on.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::gauges::normalizer::FrameKind;
use crate::mav::tables::{mav_type_name, MAV_TYPE_GCS};
use crate::mav::Frame;

/// Label reported before any vehicle type is known
pub const UNKNOWN_VEHICLE: &str = "Unknown";

/// Lock state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Unlocked,
    Locked(u8),
}

/// Vehicle lock resolver
#[derive(Debug)]
pub struct VehicleLock {
    target_type: u8,
    sys_types: HashMap<u8, u8>,
    first_vehicle_type: Option<u8>,
    state: LockState,
}

impl VehicleLock {
    /// New resolver tracking vehicles of MAV_TYPE `target_type`
    pub fn new(target_type: u8) -> Self {
        Self {
            target_type,
            sys_types: HashMap::new(),
            first_vehicle_type: None,
            state: LockState::Unlocked,
        }
    }

    pub fn state(&self) -> LockState {
        self.state
    }

    pub fn locked_system(&self) -> Option<u8> {
        match self.state {
            LockState::Locked(id) => Some(id),
            LockState::Unlocked => None,
        }
    }

    /// Last vehicle type announced by `system_id`
    pub fn announced_type(&self, system_id: u8) -> Option<u8> {
        self.sys_types.get(&system_id).copied()
    }

    /// Record a heartbeat. Non-heartbeat frames and frames without a source
    /// id or a usable `type` field are ignored.
    pub fn observe(&mut self, frame: &Frame) {
        if FrameKind::of(frame) != FrameKind::Heartbeat {
            return;
        }
        let Some(sys_id) = frame.src_system() else {
            return;
        };
        let Some(mav_type) = frame.int("type").and_then(|t| u8::try_from(t).ok()) else {
            return;
        };

        if self.sys_types.insert(sys_id, mav_type) != Some(mav_type) {
            debug!("System {} announced MAV_TYPE {}", sys_id, mav_type);
        }

        if self.first_vehicle_type.is_none() && mav_type != MAV_TYPE_GCS {
            self.first_vehicle_type = Some(mav_type);
        }

        if self.state == LockState::Unlocked && mav_type == self.target_type {
            self.state = LockState::Locked(sys_id);
            info!(
                "Locked onto system {} ({})",
                sys_id,
                mav_type_name(mav_type as i64).unwrap_or_else(|| UNKNOWN_VEHICLE.to_string())
            );
        }
    }

    /// Whether a frame passes the lock filter
    pub fn admits(&self, frame: &Frame) -> bool {
        let Some(sys_id) = frame.src_system() else {
            return true;
        };

        if let Some(&mav_type) = self.sys_types.get(&sys_id) {
            if mav_type != self.target_type {
                return false;
            }
        }

        match self.state {
            LockState::Locked(locked) => locked == sys_id,
            LockState::Unlocked => true,
        }
    }

    /// Vehicle type for snapshot metadata
    ///
    /// The locked system's type name, else the first non-GCS type seen, else
    /// [`UNKNOWN_VEHICLE`].
    pub fn vehicle_type_label(&self) -> String {
        let mav_type = self
            .locked_system()
            .and_then(|id| self.announced_type(id))
            .or(self.first_vehicle_type);

        match mav_type {
            Some(t) => mav_type_name(t as i64).unwrap_or_else(|| format!("MAV_TYPE({})", t)),
            None => UNKNOWN_VEHICLE.to_string(),
        }
    }
}
