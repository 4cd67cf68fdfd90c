//! Feed Wire Message Types
//!
//! JSON types for the quote socket. Every outbound command shares one
//! envelope:
//!
//! ```json
//! {"cmd_id": 22004, "seq_id": 3, "trace": "<uuid>", "data": {...}}
//! ```
//!
//! # Commands
//!
//! | `cmd_id` | Meaning     | `data`                                 |
//! |----------|-------------|----------------------------------------|
//! | 22000    | heartbeat   | `{}`                                   |
//! | 22004    | subscribe   | `{"symbol_list": [{"code": "..."}]}`   |
//! | 22006    | unsubscribe | `{"cancel_type": 2}`                   |
//!
//! # Inbound
//!
//! Tick pushes carry `{"data": {"code", "tick_time", "price", "volume"}}`
//! where the numeric fields may be JSON strings or numbers. Acknowledgements
//! and heartbeat replies carry other `data` shapes and are not ticks.

use std::fmt;

use rust_decimal::Decimal;
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};

use crate::domain::streaming::Tick;

// =============================================================================
// Command IDs
// =============================================================================

/// Keep-alive command.
pub const CMD_HEARTBEAT: u32 = 22000;

/// Subscribe to instrument ticks.
pub const CMD_SUBSCRIBE: u32 = 22004;

/// Cancel tick subscriptions.
pub const CMD_UNSUBSCRIBE: u32 = 22006;

/// `cancel_type` sent with every unsubscribe.
pub const CANCEL_TYPE_TICKS: u8 = 2;

/// Latest accepted `tick_time`: 9999-12-31T23:59:59.999Z in epoch ms.
pub const MAX_TICK_TIME_MS: i64 = 253_402_300_799_999;

// =============================================================================
// Outbound
// =============================================================================

/// A command before it is stamped with a sequence number and trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Keep-alive.
    Heartbeat,
    /// Subscribe to the listed instrument codes.
    Subscribe(Vec<String>),
    /// Cancel tick subscriptions.
    Unsubscribe,
}

impl Command {
    /// Subscribe to a single instrument.
    #[must_use]
    pub fn subscribe_one(code: impl Into<String>) -> Self {
        Self::Subscribe(vec![code.into()])
    }

    /// Wire command id.
    #[must_use]
    pub const fn cmd_id(&self) -> u32 {
        match self {
            Self::Heartbeat => CMD_HEARTBEAT,
            Self::Subscribe(_) => CMD_SUBSCRIBE,
            Self::Unsubscribe => CMD_UNSUBSCRIBE,
        }
    }

    /// Short name for logs and metric labels.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Heartbeat => "heartbeat",
            Self::Subscribe(_) => "subscribe",
            Self::Unsubscribe => "unsubscribe",
        }
    }

    /// Wrap the command in a wire envelope.
    #[must_use]
    pub fn into_envelope(self, seq_id: u64, trace: String) -> CommandEnvelope {
        let cmd_id = self.cmd_id();
        let data = match self {
            Self::Heartbeat => CommandData::Empty(EmptyData {}),
            Self::Subscribe(codes) => CommandData::Subscribe(SubscribeData {
                symbol_list: codes.into_iter().map(|code| SymbolEntry { code }).collect(),
            }),
            Self::Unsubscribe => CommandData::Unsubscribe(UnsubscribeData {
                cancel_type: CANCEL_TYPE_TICKS,
            }),
        };

        CommandEnvelope {
            cmd_id,
            seq_id,
            trace,
            data,
        }
    }
}

/// Outbound wire envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    /// Command id.
    pub cmd_id: u32,
    /// Per-connection sequence number, starting at 1.
    pub seq_id: u64,
    /// Unique request trace.
    pub trace: String,
    /// Command payload.
    pub data: CommandData,
}

/// Outbound payload.
///
/// Variant order matters for deserialization: `Empty` accepts any object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandData {
    /// `{"symbol_list": [...]}`
    Subscribe(SubscribeData),
    /// `{"cancel_type": 2}`
    Unsubscribe(UnsubscribeData),
    /// `{}`
    Empty(EmptyData),
}

/// Subscribe payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeData {
    /// Instruments to subscribe.
    pub symbol_list: Vec<SymbolEntry>,
}

/// One subscribed instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolEntry {
    /// Instrument code.
    pub code: String,
}

/// Unsubscribe payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsubscribeData {
    /// Cancellation scope.
    pub cancel_type: u8,
}

/// Empty payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmptyData {}

// =============================================================================
// Inbound
// =============================================================================

/// A tick push payload.
///
/// # Wire Format (JSON)
/// ```json
/// {"code": "BTCUSDT", "tick_time": "1700000000123", "price": "37000.5", "volume": "0.02"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TickPayload {
    /// Instrument code.
    pub code: String,
    /// Event time in epoch milliseconds.
    #[serde(deserialize_with = "lenient_i64")]
    pub tick_time: i64,
    /// Traded price.
    #[serde(deserialize_with = "lenient_decimal")]
    pub price: Decimal,
    /// Traded volume.
    #[serde(deserialize_with = "lenient_decimal")]
    pub volume: Decimal,
}

impl From<TickPayload> for Tick {
    fn from(payload: TickPayload) -> Self {
        Self {
            instrument_code: payload.code,
            timestamp_ms: payload.tick_time,
            price: payload.price,
            volume: payload.volume,
        }
    }
}

/// Accept a JSON string or number.
pub(crate) fn lenient_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    struct I64Visitor;

    impl Visitor<'_> for I64Visitor {
        type Value = i64;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("an integer or a string containing one")
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<i64, E> {
            Ok(v)
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<i64, E> {
            i64::try_from(v).map_err(E::custom)
        }

        #[allow(clippy::cast_possible_truncation)]
        fn visit_f64<E: de::Error>(self, v: f64) -> Result<i64, E> {
            if v.is_finite() {
                Ok(v.trunc() as i64)
            } else {
                Err(E::custom("non-finite timestamp"))
            }
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<i64, E> {
            v.trim().parse().map_err(E::custom)
        }
    }

    deserializer.deserialize_any(I64Visitor)
}

/// Accept a JSON string or number.
pub(crate) fn lenient_decimal<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    struct DecimalVisitor;

    impl Visitor<'_> for DecimalVisitor {
        type Value = Decimal;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a decimal number or a string containing one")
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Decimal, E> {
            Ok(Decimal::from(v))
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Decimal, E> {
            Ok(Decimal::from(v))
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<Decimal, E> {
            // Shortest round-trip text keeps 1.0855 from becoming 1.08549999...
            self.visit_str(&v.to_string())
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Decimal, E> {
            let trimmed = v.trim();
            trimmed
                .parse::<Decimal>()
                .or_else(|_| Decimal::from_scientific(trimmed))
                .map_err(E::custom)
        }
    }

    deserializer.deserialize_any(DecimalVisitor)
}
