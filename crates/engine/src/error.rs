//! Engine error taxonomy
//!
//! Resolution failures abort the whole pipeline invocation; there is no
//! partial-result mode for metadata resolution. Store-level failures are
//! wrapped into [`EngineError::Database`] with the original message attached
//! rather than leaking store-specific error types.

use thiserror::Error;

/// Closed error taxonomy for the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Unknown datacenter/device-type/measurement/device under strict
    /// resolution.
    #[error("record does not exist: {0}")]
    RecordNotExists(String),

    /// Malformed input shape, e.g. the wrong value type for a column.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Unexpected shape in a store response.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Any underlying store failure, with the original message attached.
    #[error("database error: {0}")]
    Database(String),
}

impl EngineError {
    /// Wrap an arbitrary store failure, preserving an already-classified
    /// engine error unchanged.
    pub fn from_store<E: std::fmt::Display>(error: E) -> Self {
        EngineError::Database(error.to_string())
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(error: reqwest::Error) -> Self {
        EngineError::Database(error.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(error: serde_json::Error) -> Self {
        EngineError::InvalidResponse(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
