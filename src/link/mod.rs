//! # Link Module
//!
//! Ingest side of the bridge: one supervised listener per MAVLink link.
//!
//! This module handles:
//! - Locking onto one vehicle on a shared link
//! - The listener loop that folds frames and publishes on a fixed cadence
//! - Restarting the listener after transport loss

pub mod listener;
pub mod lock;

pub use listener::{supervise, Listener, ListenerSettings};
pub use lock::{LockState, VehicleLock};

use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::LinkConfig;
use crate::error::Result;
use crate::fanout::Publisher;
use crate::mav::MavlinkSource;
use crate::shutdown::Shutdown;

/// Start the supervised MAVLink listener on its own thread
///
/// # Errors
///
/// Returns `Io` if the thread cannot be spawned.
pub fn spawn_listener(
    config: &LinkConfig,
    publisher: Publisher,
    shutdown: Shutdown,
) -> Result<JoinHandle<usize>> {
    let url = config.url.clone();
    let buffer = config.frame_buffer;
    let settings = ListenerSettings::from_config(config);
    let restart_delay = Duration::from_millis(config.restart_delay_ms);

    let handle = thread::Builder::new()
        .name("mavlink-listener".to_string())
        .spawn(move || {
            supervise(
                || MavlinkSource::open(&url, buffer),
                publisher,
                settings,
                restart_delay,
                shutdown,
            )
        })?;

    Ok(handle)
}
