//! Backfill Service
//!
//! Wraps a [`HistoryPort`] with the consumer-facing contract: failures and
//! empty results become [`HistoryResult::NoData`] instead of errors, and
//! single-backfill instruments are fetched at most once per
//! (instrument, resolution) per process.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::application::ports::{HistoryPort, HistoryRequest};
use crate::domain::streaming::{Bar, Resolution};

/// Outcome of a history query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryResult {
    /// Bars ordered oldest first; never empty.
    Bars(Vec<Bar>),
    /// Nothing to show: empty result, failure, or already backfilled.
    NoData,
}

impl HistoryResult {
    /// Bars, or an empty slice for `NoData`.
    #[must_use]
    pub fn bars(&self) -> &[Bar] {
        match self {
            Self::Bars(bars) => bars,
            Self::NoData => &[],
        }
    }

    /// Whether this is `NoData`.
    #[must_use]
    pub const fn is_no_data(&self) -> bool {
        matches!(self, Self::NoData)
    }
}

/// History access with the single-backfill gate.
pub struct BackfillService {
    port: Arc<dyn HistoryPort>,
    claimed: Mutex<HashSet<(String, Resolution)>>,
}

impl std::fmt::Debug for BackfillService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackfillService")
            .field("claimed", &self.claimed.lock().len())
            .finish_non_exhaustive()
    }
}

impl BackfillService {
    /// Create a service over `port`.
    #[must_use]
    pub fn new(port: Arc<dyn HistoryPort>) -> Self {
        Self {
            port,
            claimed: Mutex::new(HashSet::new()),
        }
    }

    /// Fetch history for a consumer.
    ///
    /// A single-backfill pair is claimed before the call and released again
    /// if the call fails or returns nothing, so a later attempt may retry.
    pub async fn fetch(&self, request: &HistoryRequest) -> HistoryResult {
        let key = (request.instrument_code.clone(), request.resolution);
        let gated = request.class.single_backfill();

        if gated && !self.claimed.lock().insert(key.clone()) {
            tracing::debug!(
                code = %request.instrument_code,
                resolution = %request.resolution,
                "History already fetched for single-backfill instrument"
            );
            return HistoryResult::NoData;
        }

        let result = match self.port.fetch_history(request).await {
            Ok(bars) if bars.is_empty() => {
                tracing::debug!(
                    code = %request.instrument_code,
                    resolution = %request.resolution,
                    "History returned no bars"
                );
                HistoryResult::NoData
            }
            Ok(bars) => HistoryResult::Bars(bars),
            Err(e) => {
                tracing::warn!(
                    code = %request.instrument_code,
                    resolution = %request.resolution,
                    error = %e,
                    "History request failed"
                );
                HistoryResult::NoData
            }
        };

        if gated && result.is_no_data() {
            self.claimed.lock().remove(&key);
        }
        result
    }

    /// Whether a pair has been backfilled (or is being backfilled).
    #[must_use]
    pub fn is_claimed(&self, instrument_code: &str, resolution: Resolution) -> bool {
        self.claimed
            .lock()
            .contains(&(instrument_code.to_string(), resolution))
    }
}
