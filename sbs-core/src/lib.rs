//! sbs-core: BaseStation (SBS) record parsing and aircraft state tracking.
//!
//! No async, no I/O. The server crate owns the socket, the message log, and
//! the HTTP surface; this crate owns parsing, classification, and the
//! in-memory aircraft table.

pub mod config;
pub mod parse;
pub mod pipeline;
pub mod tracker;
pub mod transform;
pub mod types;

// Re-export commonly used types at crate root
pub use parse::{parse, parse_with_tz};
pub use pipeline::{Ingested, MessageLog, Outcome, Pipeline};
pub use tracker::{AircraftState, Tracker, DEFAULT_STALENESS};
pub use transform::{should_forward, Counts, Payload, Transformer};
pub use types::*;
