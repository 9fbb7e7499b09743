//! Payload classification ahead of the tracker.
//!
//! The transport hands over raw bytes, characters, text, or nothing at all
//! (heartbeat frames). `should_forward` drops blank payloads before they are
//! counted; `Transformer` turns the rest into parsed messages and keeps the
//! valid/invalid tallies.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono_tz::Tz;
use tracing::debug;

use crate::parse::parse_with_tz;
use crate::types::*;

/// One logical record as delivered by the transport.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Payload<'a> {
    Bytes(&'a [u8]),
    Chars(&'a [char]),
    Text(&'a str),
}

impl Payload<'_> {
    fn is_blank(&self) -> bool {
        match self {
            Payload::Bytes(b) => b.iter().all(|c| c.is_ascii_whitespace()),
            Payload::Chars(c) => c.iter().all(|c| c.is_whitespace()),
            Payload::Text(s) => s.trim().is_empty(),
        }
    }

    /// Decode to text. The wire format is one byte per character, so bytes
    /// outside ASCII mean the payload is not a BaseStation record.
    pub fn decode(&self) -> Result<String> {
        match self {
            Payload::Bytes(b) => {
                if !b.is_ascii() {
                    return Err(SbsError::Decode);
                }
                Ok(b.iter().map(|&c| c as char).collect())
            }
            Payload::Chars(c) => Ok(c.iter().collect()),
            Payload::Text(s) => Ok((*s).to_string()),
        }
    }
}

/// Returns false for absent and whitespace-only payloads.
pub fn should_forward(payload: Option<&Payload<'_>>) -> bool {
    match payload {
        Some(p) => !p.is_blank(),
        None => false,
    }
}

/// Valid/invalid totals seen by one `Transformer`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct Counts {
    pub valid: u64,
    pub invalid: u64,
}

/// Decodes payloads, parses them, and counts the outcome.
///
/// A failed record comes back as `Err` after it has been counted; nothing in
/// here panics on bad input, so one corrupt line never stops the stream.
pub struct Transformer {
    tz: Tz,
    valid: AtomicU64,
    invalid: AtomicU64,
}

impl Transformer {
    pub fn new(tz: Tz) -> Self {
        Transformer {
            tz,
            valid: AtomicU64::new(0),
            invalid: AtomicU64::new(0),
        }
    }

    /// Classify one payload. Exactly one counter moves per call.
    pub fn transform(&self, payload: Option<Payload<'_>>) -> Result<Message> {
        let result = match payload {
            Some(p) => p
                .decode()
                .and_then(|text| parse_with_tz(&text, &self.tz)),
            None => Err(SbsError::AbsentPayload),
        };

        match &result {
            Ok(_) => {
                self.valid.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.invalid.fetch_add(1, Ordering::Relaxed);
                debug!("invalid payload: {e}");
            }
        }
        result
    }

    /// Count a record the transport refused before it could be parsed.
    pub fn reject(&self, err: &SbsError) {
        self.invalid.fetch_add(1, Ordering::Relaxed);
        debug!("invalid payload: {err}");
    }

    pub fn valid_count(&self) -> u64 {
        self.valid.load(Ordering::Relaxed)
    }

    pub fn invalid_count(&self) -> u64 {
        self.invalid.load(Ordering::Relaxed)
    }

    pub fn counts(&self) -> Counts {
        Counts {
            valid: self.valid_count(),
            invalid: self.invalid_count(),
        }
    }
}

impl Default for Transformer {
    fn default() -> Self {
        Transformer::new(chrono_tz::UTC)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
