//! Error types for the eqmatch crate.
//!
//! This module provides a unified error type for all eqmatch operations.
//! Numerical degeneracies inside the solver are recovered locally and never
//! surface here; only missing inputs and malformed reference data do.

use thiserror::Error;

/// Error type for eqmatch operations.
#[derive(Debug, Error)]
pub enum EqMatchError {
    /// A fit was requested without an averaged measurement.
    #[error("no measurement available: start and stop a measurement session first")]
    MissingMeasurement,

    /// A fit was requested without a reference curve.
    #[error("no reference curve loaded")]
    MissingReference,

    /// The engine already has an outstanding job.
    #[error("a fit or analysis job is already running")]
    EngineBusy,

    /// A reference curve document could not be interpreted.
    #[error("failed to parse reference curve: {message}")]
    ReferenceParse {
        /// Description of what was wrong with the document.
        message: String,
    },

    /// JSON deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for eqmatch operations.
pub type Result<T> = std::result::Result<T, EqMatchError>;

impl EqMatchError {
    /// Returns true if this error means an input was missing rather than malformed.
    pub fn is_missing_data(&self) -> bool {
        matches!(
            self,
            EqMatchError::MissingMeasurement | EqMatchError::MissingReference
        )
    }
}
