//! Slaw and protein error types

use thiserror::Error;

use crate::Retort;

/// Errors raised while building, encoding, decoding or coercing slawx
#[derive(Error, Debug)]
pub enum SlawError {
    /// Value has no numeric interpretation
    #[error("Value is not numeric: {0}")]
    NotNumeric(String),

    /// Value does not fit the requested type without losing information
    #[error("Numeric range error: {0}")]
    Range(String),

    /// Vector or array arity mismatch
    #[error("Wrong length: expected {expected}, got {actual}")]
    WrongLength { expected: String, actual: usize },

    /// Malformed slaw encoding
    #[error("Corrupt slaw: {0}")]
    CorruptSlaw(String),

    /// Malformed protein encoding
    #[error("Corrupt protein: {0}")]
    CorruptProtein(String),

    /// Lookup found nothing
    #[error("Not found: {0}")]
    NotFound(String),

    /// Constructor arguments do not describe a legal value
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience type alias
pub type Result<T> = std::result::Result<T, SlawError>;

impl SlawError {
    pub(crate) fn corrupt(message: impl Into<String>) -> Self {
        SlawError::CorruptSlaw(message.into())
    }

    pub(crate) fn corrupt_protein(message: impl Into<String>) -> Self {
        SlawError::CorruptProtein(message.into())
    }

    pub(crate) fn range(message: impl Into<String>) -> Self {
        SlawError::Range(message.into())
    }

    pub(crate) fn not_numeric(message: impl Into<String>) -> Self {
        SlawError::NotNumeric(message.into())
    }

    /// Stable status code for this error
    pub fn retort(&self) -> Retort {
        match self {
            SlawError::NotNumeric(_) => Retort::SlawNotNumeric,
            SlawError::Range(_) => Retort::SlawRangeErr,
            SlawError::WrongLength { .. } => Retort::SlawWrongLength,
            SlawError::CorruptSlaw(_) => Retort::SlawCorruptSlaw,
            SlawError::CorruptProtein(_) => Retort::SlawCorruptProtein,
            SlawError::NotFound(_) => Retort::SlawNotFound,
            SlawError::InvalidArgument(_) => Retort::InvalidArgument,
            SlawError::Io(_) => Retort::Io,
        }
    }
}
