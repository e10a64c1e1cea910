//! Error types for the crate.

use thiserror::Error;

/// Result type for fallible scheduler operations.
pub type Result<T> = std::result::Result<T, FritterError>;

/// Errors reported synchronously by scheduler operations.
///
/// Failures inside user work are not represented here: they propagate as
/// panics out of the driver's wake-up callback, leaving the scheduler in a
/// consistent state (the offending call has already been removed).
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum FritterError {
    /// A branch scale factor was not finite and positive.
    #[error("branch scale factor must be finite and positive, got {0}")]
    InvalidScale(f64),

    /// A recurrence interval was not finite and positive.
    #[error("recurrence interval must be finite and positive, got {0}")]
    InvalidInterval(f64),
}
