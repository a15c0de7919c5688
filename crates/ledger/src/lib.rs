//! Per-tenant tamper-evident hash chains.
//!
//! Every finalized record contributes one link:
//! `link_n = SHA-256(record_hash_n || link_{n-1} || timestamp_n)`.
//! Chains are isolated per tenant and only ever grow.

pub mod chain;
pub mod error;
pub mod ledger;

pub use chain::{
    compute_link_hash, verify_chain, verify_record_hashes, ChainLink, ChainVerification, GENESIS_HASH,
};
pub use error::LedgerError;
pub use ledger::HashChainLedger;
