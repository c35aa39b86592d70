//! # Gauges Module
//!
//! Canonical vehicle state and the pure functions that build it.
//!
//! This module handles:
//! - Folding decoded frames into a gauge accumulator
//! - Sanitizing the accumulator into a publishable copy

pub mod normalizer;
pub mod sanitizer;
pub mod snapshot;

pub use normalizer::fold;
pub use sanitizer::{sanitize, sanitize_at};
pub use snapshot::GaugeSnapshot;
