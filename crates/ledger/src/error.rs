//! Ledger error types.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("chain broken for tenant '{tenant_id}' at link {index}: {reason}")]
    ChainBroken {
        tenant_id: String,
        index: usize,
        reason: String,
    },

    #[error("ledger lock poisoned: {0}")]
    LockPoisoned(String),
}
