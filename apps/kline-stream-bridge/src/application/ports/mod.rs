//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `FeedCommandPort`: subscribe/cancel commands on a live feed connection
//! - `HistoryPort`: historical bar retrieval

use async_trait::async_trait;

use crate::domain::instrument::{FeedClass, InstrumentClass};
use crate::domain::streaming::{Bar, Resolution};

// =============================================================================
// Feed Commands
// =============================================================================

/// Fire-and-forget commands on one feed connection.
///
/// Implementations drop commands while the connection is not open; the
/// subscription set is replayed when it opens again.
pub trait FeedCommandPort: Send + Sync {
    /// Feed class served by this port.
    fn feed(&self) -> FeedClass;

    /// Whether commands are currently accepted.
    fn is_open(&self) -> bool;

    /// Request ticks for an instrument. Returns `false` if dropped.
    fn subscribe(&self, instrument_code: &str) -> bool;

    /// Cancel tick subscriptions. Returns `false` if dropped.
    fn cancel(&self) -> bool;
}

// =============================================================================
// History
// =============================================================================

/// Price adjustment for equity history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdjustType {
    /// Ex-rights (unadjusted) prices.
    #[default]
    ExRights,
    /// Forward-adjusted prices.
    Forward,
}

impl AdjustType {
    /// Wire code.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::ExRights => 0,
            Self::Forward => 1,
        }
    }
}

/// Maximum bars per history request.
pub const MAX_HISTORY_BARS: u32 = 1000;

/// A history query for one (instrument, resolution).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRequest {
    /// Feed instrument code.
    pub instrument_code: String,
    /// Instrument class; selects the endpoint and request shape.
    pub class: InstrumentClass,
    /// Bar width.
    pub resolution: Resolution,
    /// Newest bar to return, in epoch seconds; 0 = most recent.
    pub end_timestamp_secs: i64,
    /// Number of bars wanted, clamped to `1..=1000`.
    pub max_count: u32,
    /// Price adjustment.
    pub adjust: AdjustType,
}

impl HistoryRequest {
    /// The first, most-recent page of up to 1000 bars.
    #[must_use]
    pub fn latest(instrument_code: &str, class: InstrumentClass, resolution: Resolution) -> Self {
        Self {
            instrument_code: instrument_code.to_string(),
            class,
            resolution,
            end_timestamp_secs: 0,
            max_count: MAX_HISTORY_BARS,
            adjust: AdjustType::ExRights,
        }
    }

    /// Page ending at `end_timestamp_secs`.
    #[must_use]
    pub const fn ending_at(mut self, end_timestamp_secs: i64) -> Self {
        self.end_timestamp_secs = end_timestamp_secs;
        self
    }

    /// Set the bar count.
    #[must_use]
    pub const fn with_max_count(mut self, max_count: u32) -> Self {
        self.max_count = max_count;
        self
    }

    /// Set the price adjustment.
    #[must_use]
    pub const fn with_adjust(mut self, adjust: AdjustType) -> Self {
        self.adjust = adjust;
        self
    }

    /// Bar count actually sent.
    #[must_use]
    pub fn clamped_count(&self) -> u32 {
        self.max_count.clamp(1, MAX_HISTORY_BARS)
    }
}

/// History retrieval errors.
#[derive(Debug, thiserror::Error)]
pub enum BackfillError {
    /// Transport failure or timeout.
    #[error("history request failed: {0}")]
    Http(String),
    /// Non-success HTTP status.
    #[error("history endpoint returned HTTP {0}")]
    Status(u16),
    /// Service rejected the query.
    #[error("history query rejected (ret={ret}): {msg}")]
    Rejected {
        /// Service return code.
        ret: i64,
        /// Service message.
        msg: String,
    },
    /// Response body could not be decoded.
    #[error("invalid history response: {0}")]
    Decode(String),
    /// The resolution is not served for the instrument class.
    #[error("resolution {resolution} is not offered for {class}")]
    UnsupportedResolution {
        /// Requested resolution.
        resolution: Resolution,
        /// Instrument class.
        class: InstrumentClass,
    },
}

/// Source of historical bars.
#[async_trait]
pub trait HistoryPort: Send + Sync {
    /// Fetch bars ordered oldest first.
    ///
    /// An empty vector means the service had no bars for the query.
    async fn fetch_history(&self, request: &HistoryRequest) -> Result<Vec<Bar>, BackfillError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latest_request_defaults() {
        let req = HistoryRequest::latest("EURUSD", InstrumentClass::Forex, Resolution::Hour1);
        assert_eq!(req.end_timestamp_secs, 0);
        assert_eq!(req.max_count, 1000);
        assert_eq!(req.adjust.code(), 0);
    }

    #[test]
    fn count_is_clamped() {
        let req = HistoryRequest::latest("EURUSD", InstrumentClass::Forex, Resolution::Hour1);
        assert_eq!(req.clone().with_max_count(0).clamped_count(), 1);
        assert_eq!(req.clone().with_max_count(5000).clamped_count(), 1000);
        assert_eq!(req.with_max_count(250).clamped_count(), 250);
    }

    #[test]
    fn builders_apply() {
        let req = HistoryRequest::latest("AAPL.US", InstrumentClass::UsStock, Resolution::Day1)
            .ending_at(1_700_000_000)
            .with_adjust(AdjustType::Forward);
        assert_eq!(req.end_timestamp_secs, 1_700_000_000);
        assert_eq!(req.adjust.code(), 1);
    }
}
