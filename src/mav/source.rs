//! Frame source abstraction and the MAVLink connection behind it

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use mavlink::common::{MavCmd, MavMessage, COMMAND_LONG_DATA};
use mavlink::error::MessageReadError;
use mavlink::{MavConnection, MavHeader};
use tracing::{debug, info, warn};

use super::frame::Frame;
use crate::error::{GaugeBridgeError, Result};

/// System id we use on the link (conventional GCS id)
const OWN_SYSTEM_ID: u8 = 255;

/// Component id we use on the link (MAV_COMP_ID_MISSIONPLANNER)
const OWN_COMPONENT_ID: u8 = 190;

/// Blocking frame source driven by the listener loop
pub trait FrameSource: Send {
    /// Wait up to `timeout` for the next frame.
    ///
    /// `Ok(None)` means nothing arrived in time. `Err(Decode)` is a single
    /// bad frame; any other error ends the session.
    fn recv_frame(&mut self, timeout: Duration) -> Result<Option<Frame>>;

    /// Ask `target_system` to send AUTOPILOT_VERSION.
    ///
    /// `Ok(false)` means nothing went out (no peer known yet, or the source
    /// cannot send); the caller may try again later.
    fn request_autopilot_version(&mut self, _target_system: u8) -> Result<bool> {
        Ok(false)
    }
}

type SharedConnection = Arc<Box<dyn MavConnection<MavMessage> + Sync + Send>>;

/// MAVLink link with a dedicated reader thread
///
/// `mavlink` connections only offer an unbounded blocking `recv`, so a reader
/// thread pumps frames into a bounded channel and `recv_frame` waits on that
/// channel with a timeout. The reader exits on the first I/O error (after
/// reporting it) or once this source is dropped and the next frame arrives.
pub struct MavlinkSource {
    url: String,
    conn: SharedConnection,
    frames: Receiver<Result<Frame>>,
    header: MavHeader,
}

impl std::fmt::Debug for MavlinkSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MavlinkSource")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

impl MavlinkSource {
    /// Open a MAVLink connection (`udpin:0.0.0.0:14540`, `tcpout:host:5760`,
    /// `serial:/dev/ttyACM0:57600`, ...) and start its reader thread.
    ///
    /// # Errors
    ///
    /// Returns `Link` if the connection cannot be opened or the reader thread
    /// cannot be spawned.
    pub fn open(url: &str, buffer: usize) -> Result<Self> {
        let conn = mavlink::connect::<MavMessage>(url)
            .map_err(|e| GaugeBridgeError::Link(format!("Failed to open {}: {}", url, e)))?;
        let conn: SharedConnection = Arc::new(conn);

        let (tx, rx) = mpsc::sync_channel(buffer);
        let reader_conn = Arc::clone(&conn);
        thread::Builder::new()
            .name("mavlink-reader".to_string())
            .spawn(move || reader_loop(reader_conn, tx))
            .map_err(|e| GaugeBridgeError::Link(format!("Failed to spawn reader: {}", e)))?;

        info!("MAVLink link opened at {}", url);

        Ok(Self {
            url: url.to_string(),
            conn,
            frames: rx,
            header: MavHeader {
                system_id: OWN_SYSTEM_ID,
                component_id: OWN_COMPONENT_ID,
                sequence: 0,
            },
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

fn reader_loop(conn: SharedConnection, tx: SyncSender<Result<Frame>>) {
    loop {
        let item = match conn.recv() {
            Ok((header, msg)) => Ok(Frame::from_mavlink(&header, &msg)),
            Err(MessageReadError::Parse(e)) => Err(GaugeBridgeError::Decode(e.to_string())),
            Err(MessageReadError::Io(e)) => match e.kind() {
                std::io::ErrorKind::WouldBlock
                | std::io::ErrorKind::TimedOut
                | std::io::ErrorKind::Interrupted => continue,
                _ => {
                    warn!("MAVLink reader stopped: {}", e);
                    let _ = tx.send(Err(GaugeBridgeError::Link(e.to_string())));
                    return;
                }
            },
        };

        if tx.send(item).is_err() {
            debug!("MAVLink reader detached");
            return;
        }
    }
}

impl FrameSource for MavlinkSource {
    fn recv_frame(&mut self, timeout: Duration) -> Result<Option<Frame>> {
        match self.frames.recv_timeout(timeout) {
            Ok(Ok(frame)) => Ok(Some(frame)),
            Ok(Err(e)) => Err(e),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(GaugeBridgeError::LinkClosed),
        }
    }

    fn request_autopilot_version(&mut self, target_system: u8) -> Result<bool> {
        let cmd = COMMAND_LONG_DATA {
            target_system,
            target_component: 0,
            command: MavCmd::MAV_CMD_REQUEST_AUTOPILOT_CAPABILITIES,
            confirmation: 0,
            param1: 1.0,
            param2: 0.0,
            param3: 0.0,
            param4: 0.0,
            param5: 0.0,
            param6: 0.0,
            param7: 0.0,
        };

        self.header.sequence = self.header.sequence.wrapping_add(1);
        // A udpin link learns its peer from the first datagram and writes
        // zero bytes until then
        let written = self
            .conn
            .send(&self.header, &MavMessage::COMMAND_LONG(cmd))
            .map_err(|e| GaugeBridgeError::Link(format!("Failed to send COMMAND_LONG: {}", e)))?;
        Ok(written > 0)
    }
}
