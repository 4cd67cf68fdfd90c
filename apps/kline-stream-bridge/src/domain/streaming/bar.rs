//! Bar Builder
//!
//! Incremental OHLCV aggregation. [`advance`] is the pure step function;
//! [`BarBook`] owns the last bar per (instrument, resolution) and applies
//! ticks against it.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::resolution::Resolution;

/// One OHLCV bucket of one instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bar {
    /// Bucket start in epoch milliseconds.
    pub time: i64,
    /// First traded price in the bucket.
    pub open: Decimal,
    /// Highest traded price in the bucket.
    pub high: Decimal,
    /// Lowest traded price in the bucket.
    pub low: Decimal,
    /// Last traded price in the bucket.
    pub close: Decimal,
    /// Summed volume of the bucket.
    pub volume: Decimal,
}

impl Bar {
    /// Open a bar from the first tick of a bucket.
    #[must_use]
    pub const fn opening(time: i64, price: Decimal, volume: Decimal) -> Self {
        Self {
            time,
            open: price,
            high: price,
            low: price,
            close: price,
            volume,
        }
    }
}

/// A single trade event from the feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tick {
    /// Feed instrument code.
    pub instrument_code: String,
    /// Event time in epoch milliseconds.
    pub timestamp_ms: i64,
    /// Traded price.
    pub price: Decimal,
    /// Traded volume.
    pub volume: Decimal,
}

/// Outcome of folding one tick into the previous bar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance {
    /// The tick opened a new bucket.
    NewBucket(Bar),
    /// The tick updated the open bucket.
    SameBucket(Bar),
    /// The tick belongs to an older bucket and was dropped.
    Late,
    /// The tick cannot be folded (its bucket or volume overflows) and was
    /// dropped.
    Rejected,
}

impl Advance {
    /// The bar to emit, if any.
    #[must_use]
    pub const fn bar(&self) -> Option<&Bar> {
        match self {
            Self::NewBucket(bar) | Self::SameBucket(bar) => Some(bar),
            Self::Late | Self::Rejected => None,
        }
    }

    /// Take the bar to emit, if any.
    #[must_use]
    pub fn into_bar(self) -> Option<Bar> {
        match self {
            Self::NewBucket(bar) | Self::SameBucket(bar) => Some(bar),
            Self::Late | Self::Rejected => None,
        }
    }

    /// Whether the tick opened a new bucket.
    #[must_use]
    pub const fn is_new_bucket(&self) -> bool {
        matches!(self, Self::NewBucket(_))
    }
}

/// Fold `tick` into `prev`, where `bucket_start` is the tick's aligned bucket.
///
/// Ticks older than the current bucket are dropped so bar times never move
/// backward for a subscriber. A tick whose volume would overflow the bar is
/// rejected and `prev` stays as it was.
#[must_use]
pub fn advance(prev: Option<&Bar>, tick: &Tick, bucket_start: i64) -> Advance {
    match prev {
        Some(bar) if bucket_start < bar.time => Advance::Late,
        Some(bar) if bucket_start == bar.time => match bar.volume.checked_add(tick.volume) {
            Some(volume) => Advance::SameBucket(Bar {
                time: bar.time,
                open: bar.open,
                high: bar.high.max(tick.price),
                low: bar.low.min(tick.price),
                close: tick.price,
                volume,
            }),
            None => Advance::Rejected,
        },
        _ => Advance::NewBucket(Bar::opening(bucket_start, tick.price, tick.volume)),
    }
}

/// Last emitted bar per (instrument, resolution).
///
/// Each resolution has its own slot so a late tick for a coarse resolution
/// never disturbs a fine one, and vice versa.
#[derive(Debug, Default)]
pub struct BarBook {
    last: HashMap<(String, Resolution), Bar>,
}

impl BarBook {
    /// Create an empty book.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold `tick` into the slot for `resolution`, storing any new bar.
    pub fn fold(&mut self, tick: &Tick, resolution: Resolution) -> Advance {
        let Some(bucket_start) = resolution.bucket_start(tick.timestamp_ms) else {
            return Advance::Rejected;
        };
        let key = (tick.instrument_code.clone(), resolution);
        let outcome = advance(self.last.get(&key), tick, bucket_start);

        if let Advance::NewBucket(bar) | Advance::SameBucket(bar) = &outcome {
            self.last.insert(key, bar.clone());
        }
        outcome
    }

    /// Apply `tick` at `resolution`, storing and returning the bar to emit.
    ///
    /// Returns `None` for late or rejected ticks.
    pub fn apply(&mut self, tick: &Tick, resolution: Resolution) -> Option<Bar> {
        self.fold(tick, resolution).into_bar()
    }

    /// Most recent bar for the slot.
    #[must_use]
    pub fn last_bar(&self, instrument_code: &str, resolution: Resolution) -> Option<&Bar> {
        self.last.get(&(instrument_code.to_string(), resolution))
    }

    /// Drop the slot for an (instrument, resolution) pair.
    pub fn forget(&mut self, instrument_code: &str, resolution: Resolution) {
        self.last.remove(&(instrument_code.to_string(), resolution));
    }

    /// Drop every slot of `instrument_code` whose resolution fails `keep`.
    pub fn retain_for(&mut self, instrument_code: &str, keep: impl Fn(Resolution) -> bool) {
        self.last
            .retain(|(code, resolution), _| code != instrument_code || keep(*resolution));
    }

    /// Number of tracked slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.last.len()
    }

    /// Whether no slot is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.last.is_empty()
    }
}
