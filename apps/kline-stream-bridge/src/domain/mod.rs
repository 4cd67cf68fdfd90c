//! Domain Layer - Core aggregation types and business logic.
//!
//! This layer contains the bar builder, resolutions, the instrument catalog
//! and the subscription registry. Nothing here performs I/O.

/// Instrument classes, feed selection and symbol resolution.
pub mod instrument;

/// Ticks, bars, resolutions and bar aggregation.
pub mod streaming;

/// Subscription tracking.
pub mod subscription;
