//! Error types for the candle engine.
//!
//! Zero-field records and out-of-order keys are handled locally and never
//! show up here; everything in this enum is reported to the caller of the
//! operation that triggered it.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("cannot resample an empty series")]
    EmptySource,

    #[error("source timestamps must be non-decreasing: {current} after {previous}")]
    NonMonotonic { previous: i64, current: i64 },

    #[error("sampling period must be positive, got {0}")]
    InvalidPeriod(i64),

    #[error("unknown interval code '{0}'")]
    UnknownInterval(String),

    #[error("index {index} out of range for series of length {len}")]
    IndexOutOfRange { index: isize, len: usize },

    #[error("malformed kline: {0}")]
    MalformedKline(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("serialisation error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl EngineError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        EngineError::MalformedKline(msg.into())
    }
}

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Reject non-positive sampling periods.
pub(crate) fn check_period(period: i64) -> EngineResult<i64> {
    if period > 0 {
        Ok(period)
    } else {
        Err(EngineError::InvalidPeriod(period))
    }
}
