//! Engine error types and their stable error codes.

use ledgerflow_core::{CoreError, JobStatus, SourceType};
use ledgerflow_ledger::LedgerError;
use ledgerflow_pipeline::PipelineError;
use ledgerflow_queue::QueueError;
use thiserror::Error;

/// Failure reported by a source connector.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConnectorError {
    #[error("no connector registered for source type '{0}'")]
    Unsupported(SourceType),

    #[error("source unavailable: {0}")]
    Unavailable(String),

    #[error("read failed: {0}")]
    Read(String),
}

/// Failure reported by the audit logger. Never fatal to the engine.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AuditError {
    #[error("audit log unavailable: {0}")]
    Unavailable(String),

    #[error("audit entry rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("data source not found: {0}")]
    SourceNotFound(String),

    #[error("ingestion job not found: {0}")]
    JobNotFound(String),

    #[error("invalid data source: {0}")]
    InvalidSource(String),

    #[error("data source already registered: {0}")]
    DuplicateSource(String),

    #[error("encryption config invalid: {0}")]
    EncryptionConfigInvalid(String),

    #[error("data source is inactive: {0}")]
    SourceInactive(String),

    #[error("invalid job config: {0}")]
    InvalidJobConfig(String),

    /// A run stopped on invalid records; the message names the record or
    /// the quarantine ratio.
    #[error("{0}")]
    ValidationFailed(String),

    #[error("cannot {action} job {job_id} while {from}")]
    InvalidStateTransition {
        job_id: String,
        from: JobStatus,
        action: &'static str,
    },

    #[error("job {job_id} exhausted its retries ({attempts} errors, max {max_retries})")]
    RetryLimitExceeded {
        job_id: String,
        attempts: u32,
        max_retries: u32,
    },

    #[error("connector error: {0}")]
    Connector(#[from] ConnectorError),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("config error: {0}")]
    Config(#[from] CoreError),
}

impl EngineError {
    /// Stable, machine-readable error kind.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::SourceNotFound(_) => "SOURCE_NOT_FOUND",
            EngineError::JobNotFound(_) => "JOB_NOT_FOUND",
            EngineError::InvalidSource(_) => "INVALID_SOURCE",
            EngineError::DuplicateSource(_) => "DUPLICATE_SOURCE",
            EngineError::EncryptionConfigInvalid(_) => "ENCRYPTION_CONFIG_INVALID",
            EngineError::SourceInactive(_) => "SOURCE_INACTIVE",
            EngineError::InvalidJobConfig(_) => "INVALID_JOB_CONFIG",
            EngineError::ValidationFailed(_) => "VALIDATION_FAILED",
            EngineError::InvalidStateTransition { .. } => "INVALID_STATE_TRANSITION",
            EngineError::RetryLimitExceeded { .. } => "RETRY_LIMIT_EXCEEDED",
            EngineError::Connector(_) => "CONNECTOR_ERROR",
            EngineError::Ledger(_) => "LEDGER_ERROR",
            EngineError::Queue(QueueError::Full { .. }) => "QUEUE_FULL",
            EngineError::Queue(QueueError::AlreadyQueued { .. }) => "INVALID_STATE_TRANSITION",
            EngineError::Queue(QueueError::NotFound(_)) => "QUEUE_NOT_FOUND",
            EngineError::Config(_) => "CONFIG_INVALID",
        }
    }
}

impl From<PipelineError> for EngineError {
    fn from(e: PipelineError) -> Self {
        EngineError::InvalidJobConfig(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerflow_core::Priority;

    #[test]
    fn codes_are_stable() {
        assert_eq!(EngineError::SourceNotFound("s".into()).code(), "SOURCE_NOT_FOUND");
        assert_eq!(
            EngineError::from(QueueError::Full { lane: Priority::High, capacity: 2 }).code(),
            "QUEUE_FULL"
        );
        assert_eq!(
            EngineError::InvalidStateTransition {
                job_id: "j".into(),
                from: JobStatus::Running,
                action: "resume",
            }
            .code(),
            "INVALID_STATE_TRANSITION"
        );
        assert_eq!(
            EngineError::from(PipelineError::UnknownCustomRule("x".into())).code(),
            "INVALID_JOB_CONFIG"
        );
    }

    #[test]
    fn validation_failure_carries_its_reason_verbatim() {
        let err = EngineError::ValidationFailed("record 2: email: required".into());
        assert_eq!(err.code(), "VALIDATION_FAILED");
        assert_eq!(format!("{}: {err}", err.code()), "VALIDATION_FAILED: record 2: email: required");
    }

    #[test]
    fn transition_message_names_action_and_state() {
        let err = EngineError::InvalidStateTransition {
            job_id: "j1".into(),
            from: JobStatus::Completed,
            action: "pause",
        };
        assert_eq!(err.to_string(), "cannot pause job j1 while completed");
    }
}
