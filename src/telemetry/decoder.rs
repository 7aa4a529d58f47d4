//! # Frame Decoder
//!
//! Turns one received text line into a [`TelemetryRecord`] or reports that
//! the line is not a telemetry frame.

use super::schema::{TelemetryRecord, FIELD_COUNT};

/// Outcome of decoding one non-empty line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeResult {
    /// Line matched the fixed schema
    Telemetry(TelemetryRecord),
    /// Line had too few fields; carries the trimmed line for echo paths
    NotTelemetry(String),
}

/// Line-to-record decoder
///
/// No numeric validation happens here: a frame with enough fields is
/// telemetry even if every value is garbage.
#[derive(Debug, Clone, Default)]
pub struct FrameDecoder {
    filter_character: Option<char>,
}

impl FrameDecoder {
    /// Create a decoder that strips one leading `filter_character`, if given
    pub fn new(filter_character: Option<char>) -> Self {
        Self { filter_character }
    }

    /// Decode a line
    ///
    /// Returns `None` when the line is empty after trimming.
    ///
    /// # Examples
    ///
    /// ```
    /// use ddl_ground::telemetry::decoder::{DecodeResult, FrameDecoder};
    ///
    /// let decoder = FrameDecoder::new(None);
    /// assert!(decoder.decode("   ").is_none());
    /// assert_eq!(
    ///     decoder.decode(" hello "),
    ///     Some(DecodeResult::NotTelemetry("hello".to_string()))
    /// );
    /// ```
    pub fn decode(&self, line: &str) -> Option<DecodeResult> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }

        let body = match self.filter_character {
            Some(c) => trimmed.strip_prefix(c).map(str::trim).unwrap_or(trimmed),
            None => trimmed,
        };

        let parts: Vec<&str> = body.split(',').map(str::trim).collect();
        if parts.len() < FIELD_COUNT {
            return Some(DecodeResult::NotTelemetry(trimmed.to_string()));
        }

        match TelemetryRecord::from_values(parts) {
            Some(record) => Some(DecodeResult::Telemetry(record)),
            None => Some(DecodeResult::NotTelemetry(trimmed.to_string())),
        }
    }
}
