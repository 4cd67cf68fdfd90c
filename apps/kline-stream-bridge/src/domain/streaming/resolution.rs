//! Bar Resolutions
//!
//! A single canonical resolution type carrying the chart-facing label, the
//! bucket width in seconds, and the feed's numeric `kline_type` code.
//!
//! | Label | Width      | kline_type | Equities |
//! |-------|------------|------------|----------|
//! | `1`   | 1 minute   | 1          | yes      |
//! | `5`   | 5 minutes  | 2          | yes      |
//! | `15`  | 15 minutes | 3          | yes      |
//! | `30`  | 30 minutes | 4          | yes      |
//! | `60`  | 1 hour     | 5          | yes      |
//! | `120` | 2 hours    | 6          | no       |
//! | `240` | 4 hours    | 7          | no       |
//! | `1D`  | 1 day      | 8          | yes      |
//! | `1W`  | 1 week     | 9          | yes      |
//! | `1M`  | 30 days    | 10         | yes      |

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Extra time added to bar countdowns so the next bar has settled upstream.
pub const NEXT_BAR_SETTLE_MS: i64 = 1_500;

/// Bar width requested by a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Resolution {
    /// 1 minute bars.
    Minute1,
    /// 5 minute bars.
    Minute5,
    /// 15 minute bars.
    Minute15,
    /// 30 minute bars.
    Minute30,
    /// 1 hour bars.
    Hour1,
    /// 2 hour bars (not offered for equities).
    Hour2,
    /// 4 hour bars (not offered for equities).
    Hour4,
    /// Daily bars.
    Day1,
    /// Weekly bars.
    Week1,
    /// Monthly bars, bucketed as fixed 30-day windows.
    Month1,
}

impl Resolution {
    /// All resolutions, shortest first.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Minute1,
            Self::Minute5,
            Self::Minute15,
            Self::Minute30,
            Self::Hour1,
            Self::Hour2,
            Self::Hour4,
            Self::Day1,
            Self::Week1,
            Self::Month1,
        ]
    }

    /// Chart-facing label (`"1"`, `"60"`, `"1D"`, ...).
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Minute1 => "1",
            Self::Minute5 => "5",
            Self::Minute15 => "15",
            Self::Minute30 => "30",
            Self::Hour1 => "60",
            Self::Hour2 => "120",
            Self::Hour4 => "240",
            Self::Day1 => "1D",
            Self::Week1 => "1W",
            Self::Month1 => "1M",
        }
    }

    /// Bucket width in seconds.
    #[must_use]
    pub const fn interval_secs(self) -> i64 {
        match self {
            Self::Minute1 => 60,
            Self::Minute5 => 300,
            Self::Minute15 => 900,
            Self::Minute30 => 1_800,
            Self::Hour1 => 3_600,
            Self::Hour2 => 7_200,
            Self::Hour4 => 14_400,
            Self::Day1 => 86_400,
            Self::Week1 => 604_800,
            Self::Month1 => 2_592_000,
        }
    }

    /// Bucket width in milliseconds.
    #[must_use]
    pub const fn interval_millis(self) -> i64 {
        self.interval_secs() * 1_000
    }

    /// Feed protocol `kline_type` code.
    #[must_use]
    pub const fn kline_type(self) -> u8 {
        match self {
            Self::Minute1 => 1,
            Self::Minute5 => 2,
            Self::Minute15 => 3,
            Self::Minute30 => 4,
            Self::Hour1 => 5,
            Self::Hour2 => 6,
            Self::Hour4 => 7,
            Self::Day1 => 8,
            Self::Week1 => 9,
            Self::Month1 => 10,
        }
    }

    /// Look up a resolution by its `kline_type` code.
    #[must_use]
    pub fn from_kline_type(code: u8) -> Option<Self> {
        Self::all().iter().copied().find(|r| r.kline_type() == code)
    }

    /// Whether the feed serves this resolution for exchange-listed equities.
    #[must_use]
    pub const fn available_for_equities(self) -> bool {
        !matches!(self, Self::Hour2 | Self::Hour4)
    }

    /// Start of the bucket containing `timestamp_ms`.
    ///
    /// `None` when the bucket start does not fit in an `i64`.
    #[must_use]
    pub const fn bucket_start(self, timestamp_ms: i64) -> Option<i64> {
        let width = self.interval_millis();
        match timestamp_ms.checked_div_euclid(width) {
            Some(index) => index.checked_mul(width),
            None => None,
        }
    }

    /// Milliseconds from `now_ms` until the next bucket opens, plus the
    /// settle margin.
    #[must_use]
    pub const fn millis_until_next_bar(self, now_ms: i64) -> Option<i64> {
        let Some(start) = self.bucket_start(now_ms) else {
            return None;
        };
        // 0 <= elapsed < width
        let elapsed = now_ms - start;
        Some(self.interval_millis() - elapsed + NEXT_BAR_SETTLE_MS)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Error returned when a resolution label is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported resolution: {0}")]
pub struct ParseResolutionError(pub String);

impl FromStr for Resolution {
    type Err = ParseResolutionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match trimmed {
            "D" => return Ok(Self::Day1),
            "W" => return Ok(Self::Week1),
            "M" => return Ok(Self::Month1),
            _ => {}
        }
        Self::all()
            .iter()
            .copied()
            .find(|r| r.label() == trimmed)
            .ok_or_else(|| ParseResolutionError(trimmed.to_string()))
    }
}

impl Serialize for Resolution {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

impl<'de> Deserialize<'de> for Resolution {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
