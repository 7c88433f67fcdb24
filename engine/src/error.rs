//! Error types for the gridsync engine.

use crate::Identity;
use thiserror::Error;

/// All possible errors from the gridsync engine.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    // Validation errors
    #[error("missing required field: {0}")]
    MissingRequiredField(String),

    #[error("field '{field}' out of range: {value} not in [{lo}, {hi}]", lo = fmt_bound(.min), hi = fmt_bound(.max))]
    OutOfRange {
        field: String,
        value: f64,
        min: Option<f64>,
        max: Option<f64>,
    },

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    // Store errors
    #[error("record not found: {0}")]
    RecordNotFound(Identity),

    #[error("identity already in use: {0}")]
    DuplicateIdentity(Identity),
}

impl Error {
    /// Whether this error is a record validation failure.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::MissingRequiredField(_) | Error::OutOfRange { .. }
        )
    }
}

fn fmt_bound(bound: &Option<f64>) -> String {
    bound.map_or_else(|| "-".to_string(), |b| b.to_string())
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
