//! Feed Codec
//!
//! Text-frame encoding and decoding for the quote socket.
//!
//! Decoding classifies each frame:
//! - a `data` object with a `code` field is a tick push
//! - any other frame with `data` is a control reply (acks, heartbeat echoes)
//! - a frame without `data` carries nothing for the router
//!
//! Frames that are not JSON, or tick pushes whose fields do not parse or
//! whose `tick_time` is outside `0..=MAX_TICK_TIME_MS`, are errors. The
//! connection logs and counts them; they never end the session.

use super::messages::{Command, CommandEnvelope, MAX_TICK_TIME_MS, TickPayload};
use crate::domain::streaming::Tick;

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame is valid JSON but not an object.
    #[error("invalid frame format: {0}")]
    InvalidFormat(String),

    /// Tick push decoded but its values are unusable.
    #[error("invalid tick: {0}")]
    InvalidTick(String),
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// A tick push.
    Tick(Tick),
    /// A non-tick reply, identified by its `cmd_id` when present.
    Control {
        /// Reply command id.
        cmd_id: Option<u64>,
    },
    /// A frame without a `data` member.
    Empty,
}

/// JSON codec for the quote socket.
#[derive(Debug, Default, Clone)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new JSON codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Encode a command envelope to a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self, envelope: &CommandEnvelope) -> Result<String, CodecError> {
        Ok(serde_json::to_string(envelope)?)
    }

    /// Stamp and encode a command in one step.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode_command(
        &self,
        command: Command,
        seq_id: u64,
        trace: String,
    ) -> Result<String, CodecError> {
        self.encode(&command.into_envelope(seq_id, trace))
    }

    /// Decode an inbound text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not a JSON object or a tick push is
    /// malformed.
    pub fn decode(&self, text: &str) -> Result<InboundFrame, CodecError> {
        let value: serde_json::Value = serde_json::from_str(text.trim())?;
        let serde_json::Value::Object(mut frame) = value else {
            return Err(CodecError::InvalidFormat(format!(
                "expected JSON object, got: {}",
                preview(text)
            )));
        };

        let Some(data) = frame.remove("data") else {
            return Ok(InboundFrame::Empty);
        };

        if data.get("code").is_some() {
            let payload: TickPayload = serde_json::from_value(data)?;
            if !(0..=MAX_TICK_TIME_MS).contains(&payload.tick_time) {
                return Err(CodecError::InvalidTick(format!(
                    "{} tick_time out of range: {}",
                    payload.code, payload.tick_time
                )));
            }
            return Ok(InboundFrame::Tick(payload.into()));
        }

        Ok(InboundFrame::Control {
            cmd_id: frame.get("cmd_id").and_then(serde_json::Value::as_u64),
        })
    }
}

fn preview(text: &str) -> &str {
    let end = text
        .char_indices()
        .nth(50)
        .map_or(text.len(), |(idx, _)| idx);
    &text[..end]
}
