//! # Listener Loop
//!
//! Drives the normalizer, the vehicle lock and the sanitizer against a live
//! frame source, and restarts the session when the link drops.

use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::lock::VehicleLock;
use crate::config::LinkConfig;
use crate::error::Result;
use crate::fanout::event::{CHANNEL_RAW, CHANNEL_SNAPSHOT, CHANNEL_STATUS};
use crate::fanout::{Event, Lifecycle, Publisher};
use crate::gauges::normalizer::FrameKind;
use crate::gauges::{fold, sanitize, GaugeSnapshot};
use crate::mav::tables::firmware_label;
use crate::mav::{Frame, FrameSource};
use crate::shutdown::Shutdown;

/// Status string carried by every status event
pub const STATUS_CONNECTED: &str = "Connected";

/// Firmware label before AUTOPILOT_VERSION arrives
pub const UNKNOWN_FIRMWARE: &str = "Unknown";

/// Minimum spacing of AUTOPILOT_VERSION requests while the version is unknown
pub const VERSION_RETRY: Duration = Duration::from_secs(5);

/// Timing and filtering knobs of one listener session
#[derive(Debug, Clone)]
pub struct ListenerSettings {
    pub recv_timeout: Duration,
    pub publish_period: Duration,
    pub initial_snapshot_delay: Duration,
    pub target_mav_type: u8,
    pub forward_raw_frames: bool,
}

impl ListenerSettings {
    pub fn from_config(config: &LinkConfig) -> Self {
        Self {
            recv_timeout: Duration::from_millis(config.recv_timeout_ms),
            publish_period: Duration::from_secs(1) / config.publish_rate_hz.max(1),
            initial_snapshot_delay: Duration::from_millis(config.initial_snapshot_delay_ms),
            target_mav_type: config.target_mav_type,
            forward_raw_frames: config.forward_raw_frames,
        }
    }
}

/// One listener session
///
/// Owns the gauge accumulator and the vehicle lock; consumers only ever see
/// sanitized copies published through the [`Publisher`].
pub struct Listener<S: FrameSource> {
    source: S,
    publisher: Publisher,
    settings: ListenerSettings,
    shutdown: Shutdown,
    gauges: GaugeSnapshot,
    lock: VehicleLock,
    packets_received: u64,
    decode_errors: u64,
    firmware_version: Option<String>,
    version_requested_at: Option<Instant>,
}

impl<S: FrameSource> Listener<S> {
    pub fn new(
        source: S,
        publisher: Publisher,
        settings: ListenerSettings,
        shutdown: Shutdown,
    ) -> Self {
        let lock = VehicleLock::new(settings.target_mav_type);
        Self {
            source,
            publisher,
            settings,
            shutdown,
            gauges: GaugeSnapshot::new(),
            lock,
            packets_received: 0,
            decode_errors: 0,
            firmware_version: None,
            version_requested_at: None,
        }
    }

    pub fn gauges(&self) -> &GaugeSnapshot {
        &self.gauges
    }

    pub fn vehicle_lock(&self) -> &VehicleLock {
        &self.lock
    }

    pub fn packets_received(&self) -> u64 {
        self.packets_received
    }

    pub fn decode_errors(&self) -> u64 {
        self.decode_errors
    }

    pub fn firmware_version(&self) -> &str {
        self.firmware_version.as_deref().unwrap_or(UNKNOWN_FIRMWARE)
    }

    /// Run until the link fails or shutdown is requested.
    ///
    /// # Errors
    ///
    /// Returns the transport error that ended the session. Decode errors are
    /// counted and skipped.
    pub fn run(&mut self) -> Result<()> {
        let started = Instant::now();
        let period = self.settings.publish_period;
        let mut next_tick = started + period;
        let mut snapshot_due = Some(started + self.settings.initial_snapshot_delay);

        while !self.shutdown.is_triggered() {
            let now = Instant::now();

            if now >= next_tick {
                self.publish_status();
                next_tick += period;
                if next_tick <= now {
                    // Fell behind by more than a period; skip the missed ticks
                    next_tick = now + period;
                }
            }

            if let Some(due) = snapshot_due {
                if now >= due {
                    self.publish_snapshot();
                    snapshot_due = None;
                }
            }

            let mut deadline = next_tick;
            if let Some(due) = snapshot_due {
                deadline = deadline.min(due);
            }
            let wait = self
                .settings
                .recv_timeout
                .min(deadline.saturating_duration_since(Instant::now()));

            match self.source.recv_frame(wait) {
                Ok(Some(frame)) => self.handle_frame(frame),
                Ok(None) => {}
                Err(e) if !e.is_transport() => {
                    self.decode_errors += 1;
                    debug!("Skipping bad frame: {}", e);
                }
                Err(e) => return Err(e),
            }
        }

        info!("Listener stopped");
        Ok(())
    }

    fn handle_frame(&mut self, frame: Frame) {
        self.packets_received += 1;
        self.lock.observe(&frame);

        if !self.lock.admits(&frame) {
            return;
        }

        let kind = FrameKind::of(&frame);
        if kind == FrameKind::Heartbeat {
            self.request_version_if_unknown(&frame);
        }
        if kind == FrameKind::AutopilotVersion {
            let version = frame
                .int("flight_sw_version")
                .and_then(|v| u32::try_from(v).ok());
            if let Some(version) = version {
                let label = firmware_label(version);
                if self.firmware_version.as_deref() != Some(label.as_str()) {
                    info!("Autopilot firmware {}", label);
                }
                self.firmware_version = Some(label);
            }
        }

        fold(&mut self.gauges, &frame);

        if self.settings.forward_raw_frames {
            self.publisher.publish(Event::json(CHANNEL_RAW, &frame.to_json()));
        }
    }

    /// Ask the vehicle for AUTOPILOT_VERSION once it has announced itself.
    ///
    /// Repeats at most every [`VERSION_RETRY`] until the version arrives; a
    /// request the link could not send yet is retried on the next heartbeat.
    fn request_version_if_unknown(&mut self, heartbeat: &Frame) {
        if self.firmware_version.is_some() {
            return;
        }
        if let Some(at) = self.version_requested_at {
            if at.elapsed() < VERSION_RETRY {
                return;
            }
        }

        let target = heartbeat.src_system().unwrap_or(0);
        match self.source.request_autopilot_version(target) {
            Ok(true) => {
                debug!("Requested AUTOPILOT_VERSION from system {}", target);
                self.version_requested_at = Some(Instant::now());
            }
            Ok(false) => debug!("AUTOPILOT_VERSION request not sent yet"),
            Err(e) => warn!("AUTOPILOT_VERSION request failed: {}", e),
        }
    }

    fn sanitized_gauges(&self) -> Option<Value> {
        match serde_json::to_value(sanitize(&self.gauges)) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Failed to serialize gauges: {}", e);
                None
            }
        }
    }

    /// Body of the periodic `telemetry_status` event
    pub fn status_json(&self) -> Option<Value> {
        let gauges = self.sanitized_gauges()?;
        Some(json!({
            "status": STATUS_CONNECTED,
            "packets_received": self.packets_received,
            "vehicle_type": self.lock.vehicle_type_label(),
            "firmware_version": self.firmware_version(),
            "gauges": gauges,
        }))
    }

    fn publish_status(&self) {
        if let Some(status) = self.status_json() {
            self.publisher.publish(Event::json(CHANNEL_STATUS, &status));
        }
    }

    fn publish_snapshot(&self) {
        let Some(gauges) = self.sanitized_gauges() else {
            return;
        };
        let snapshot = json!({
            "meta": {
                "vehicle_type": self.lock.vehicle_type_label(),
                "firmware_version": self.firmware_version(),
            },
            "gauges": gauges,
        });
        debug!("Publishing initial gauge snapshot");
        self.publisher.publish(Event::json(CHANNEL_SNAPSHOT, &snapshot));
    }
}

/// Keep a listener running across link failures
///
/// Each pass opens a fresh source (new lock, empty accumulator), runs a
/// session, then waits `restart_delay` before trying again. Returns the
/// number of sessions run once shutdown is requested.
pub fn supervise<S, F>(
    mut open: F,
    publisher: Publisher,
    settings: ListenerSettings,
    restart_delay: Duration,
    shutdown: Shutdown,
) -> usize
where
    S: FrameSource,
    F: FnMut() -> Result<S>,
{
    let mut sessions = 0;

    while !shutdown.is_triggered() {
        match open() {
            Ok(source) => {
                sessions += 1;
                info!("Listener session {} started", sessions);
                publisher.publish(Event::meta(Lifecycle::Connect));

                let mut listener = Listener::new(
                    source,
                    publisher.clone(),
                    settings.clone(),
                    shutdown.clone(),
                );
                if let Err(e) = listener.run() {
                    warn!(
                        "Listener session {} ended after {} packets: {}",
                        sessions,
                        listener.packets_received(),
                        e
                    );
                }

                publisher.publish(Event::meta(Lifecycle::Disconnect));
            }
            Err(e) => warn!("Failed to open MAVLink link: {}", e),
        }

        if shutdown.is_triggered() {
            break;
        }
        info!("Restarting listener in {:?}", restart_delay);
        shutdown.sleep(restart_delay);
    }

    sessions
}
