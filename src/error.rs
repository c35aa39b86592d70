//! # Error Types
//!
//! Custom error types for Gauge Bridge using `thiserror`.

use thiserror::Error;

/// Main error type for Gauge Bridge
#[derive(Debug, Error)]
pub enum GaugeBridgeError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// MAVLink link could not be opened or failed while reading
    #[error("MAVLink link error: {0}")]
    Link(String),

    /// MAVLink reader stopped; the session is over
    #[error("MAVLink link closed")]
    LinkClosed,

    /// A single frame could not be decoded
    #[error("Frame decode error: {0}")]
    Decode(String),

    /// Relay upstream (companion stream) errors
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Event payload serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GaugeBridgeError {
    /// Whether this error ends the current listener session.
    ///
    /// Decode errors are isolated to one frame; everything else means the
    /// link is gone and the supervisor has to reopen it.
    pub fn is_transport(&self) -> bool {
        !matches!(self, GaugeBridgeError::Decode(_))
    }
}

/// Result type alias for Gauge Bridge
pub type Result<T> = std::result::Result<T, GaugeBridgeError>;
