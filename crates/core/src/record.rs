//! The processed unit written to the ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::quality::QualityMetrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Public,
    Internal,
    Confidential,
    Restricted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub version: u32,
    /// SHA-256 hex of the canonical JSON payload.
    pub checksum: String,
    pub pii_fields: Vec<String>,
    pub classification: Classification,
    pub retention_days: u32,
    pub legal_hold: bool,
}

/// A finalized record. Immutable once its link is appended to the chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataRecord {
    pub id: String,
    pub tenant_id: String,
    pub source_id: String,
    pub job_id: String,
    pub data: Value,
    pub metadata: RecordMetadata,
    pub quality: QualityMetrics,
    /// Content hash handed to the ledger.
    pub hash: String,
    /// Chain link this record builds on.
    pub previous_hash: String,
    /// Chain link produced by appending this record.
    pub chain_hash: String,
    pub ingested_at: DateTime<Utc>,
}
