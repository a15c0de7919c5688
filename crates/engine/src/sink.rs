//! Destination for finalized records.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use ledgerflow_core::DataRecord;

use crate::error::ConnectorError;

/// Receives every record after its ledger append, in chain order per job.
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn accept(&self, record: DataRecord) -> Result<(), ConnectorError>;
}

/// Keeps every accepted record in memory.
#[derive(Debug, Default)]
pub struct MemoryRecordSink {
    records: Mutex<Vec<DataRecord>>,
}

impl MemoryRecordSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<DataRecord> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn for_tenant(&self, tenant_id: &str) -> Vec<DataRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| r.tenant_id == tenant_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RecordSink for MemoryRecordSink {
    async fn accept(&self, record: DataRecord) -> Result<(), ConnectorError> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
        Ok(())
    }
}
