//! Market Data Streaming Types
//!
//! Core domain types for bar aggregation: ticks, bars, resolutions and the
//! per-slot bar book. These types are codec-agnostic.

mod bar;
mod resolution;

pub use bar::{Advance, Bar, BarBook, Tick, advance};
pub use resolution::{NEXT_BAR_SETTLE_MS, ParseResolutionError, Resolution};
