use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    #[error("invalid byte length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("empty or inverted interval: start {start} is not before end {end}")]
    EmptyInterval { start: String, end: String },

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("invalid interval string: {0}")]
    InvalidInterval(String),

    #[error("invalid version label: {0}")]
    InvalidVersion(String),

    #[error("invalid series id: {0}")]
    InvalidSeriesId(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}
