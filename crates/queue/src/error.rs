//! Queue error types.

use ledgerflow_core::Priority;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue '{lane}' is full (capacity {capacity})")]
    Full { lane: Priority, capacity: usize },

    #[error("job '{job_id}' is already queued in lane '{lane}'")]
    AlreadyQueued { job_id: String, lane: Priority },

    #[error("queue not found: {0}")]
    NotFound(String),
}
