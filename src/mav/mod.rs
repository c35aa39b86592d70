//! # MAVLink Module
//!
//! Everything that touches the autopilot link.
//!
//! This module handles:
//! - Opening a MAVLink connection and reading it on a dedicated thread
//! - Reducing typed MAVLink messages to named-field [`frame::Frame`]s
//! - Lookup tables for vehicle types, GPS fix types and flight modes

pub mod frame;
pub mod source;
pub mod tables;

pub use frame::{FieldValue, Frame};
pub use source::{FrameSource, MavlinkSource};
