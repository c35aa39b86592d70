//! # Fanout Module
//!
//! Delivers published events to any number of independent consumers.
//!
//! This module handles:
//! - Bounded per-subscriber queues with drop-oldest backpressure
//! - Caching the last event for late subscribers
//! - The event envelope and the publish call site shared by SSE and WebSocket feeds

pub mod broadcaster;
pub mod event;

pub use broadcaster::{Broadcaster, Subscription, DEFAULT_CAPACITY};
pub use event::{Event, Lifecycle, Publisher};
