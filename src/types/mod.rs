//! Shared types for ChoosePure

pub mod error;
pub mod usage;

pub use error::{AlreadyDone, AppError, Resource, Result};
pub use usage::{Remaining, UsageKind};

/// Round to one decimal place for display
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
