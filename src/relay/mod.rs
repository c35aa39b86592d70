//! # Relay Module
//!
//! Cross-process counterpart of the companion feed.
//!
//! This module handles:
//! - A reconnecting client connection to the companion's event stream
//! - Bridge state counters and the last known position
//! - Republishing upstream events to local subscribers

pub mod bridge;
pub mod state;
pub mod transport;

pub use bridge::RelayBridge;
pub use state::{parse_position, BridgeState, BridgeStatus, LastPosition};
pub use transport::{SseTransport, UpstreamEvent, UpstreamSession, UpstreamTransport};
