//! Logging infrastructure for ChoosePure
//!
//! Diagnostic logging goes through `tracing`. Business conversions are also
//! appended to an optional JSONL audit file for offline funnel analysis.

pub mod events;

pub use events::{ConversionEvent, EventLogger, EventType};
