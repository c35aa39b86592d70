//! # Gauge Bridge Library
//!
//! Turn a MAVLink telemetry link into live gauge feeds.
//!
//! This library provides the ingest-normalize-filter-fanout pipeline that
//! folds autopilot frames into a canonical gauge snapshot and publishes it to
//! any number of SSE and WebSocket consumers, plus a relay bridge that
//! republishes that feed across a process or network boundary.

pub mod config;
pub mod error;
pub mod fanout;
pub mod gauges;
pub mod link;
pub mod mav;
pub mod relay;
pub mod server;
pub mod shutdown;
