//! Pipeline error types.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PipelineError {
    #[error("invalid regex '{pattern}' for field '{field}': {reason}")]
    InvalidRegex {
        field: String,
        pattern: String,
        reason: String,
    },

    #[error("unknown custom validation rule '{0}'")]
    UnknownCustomRule(String),

    #[error("dedup action '{0}' requires a registered duplicate handler")]
    MissingDuplicateHandler(String),

    #[error("cannot apply {transform} to field '{field}': {reason}")]
    Transform {
        field: String,
        transform: String,
        reason: String,
    },

    #[error("calculated field '{field}': {reason}")]
    Expression { field: String, reason: String },
}

/// Errors from enrichment side sources. Never fatal to a record.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EnrichmentError {
    #[error("side source '{0}' is not registered")]
    NotRegistered(String),

    #[error("side source unavailable: {0}")]
    Unavailable(String),

    #[error("side source query failed: {0}")]
    Failed(String),
}
