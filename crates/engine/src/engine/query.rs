//! Read-only half of the job control API.

use ledgerflow_core::{DataSource, IngestionJob};
use ledgerflow_ledger::{verify_record_hashes, ChainLink, ChainVerification};
use ledgerflow_queue::IngestionQueue;
use tokio::sync::broadcast;

use super::IngestionEngine;
use crate::error::EngineError;
use crate::events::{JobCompletion, JobEvent};
use crate::scheduler::SchedulerMetrics;
use crate::store::QuarantinedRecord;

impl IngestionEngine {
    pub fn get_job(&self, job_id: &str) -> Result<IngestionJob, EngineError> {
        self.inner.jobs.get(job_id)
    }

    /// Jobs in creation order, optionally for one tenant.
    pub fn get_jobs(&self, tenant_id: Option<&str>) -> Vec<IngestionJob> {
        self.inner.jobs.list(tenant_id)
    }

    pub fn get_data_source(&self, source_id: &str) -> Result<DataSource, EngineError> {
        self.inner.sources.get(source_id)
    }

    pub fn get_data_sources(&self, tenant_id: Option<&str>) -> Vec<DataSource> {
        self.inner.sources.list(tenant_id)
    }

    /// Lane view by id: `critical`, `high`, `medium` or `low`.
    pub fn get_queue(&self, queue_id: &str) -> Result<IngestionQueue, EngineError> {
        Ok(self.inner.queues.queue(queue_id)?)
    }

    /// All lanes in scheduling order.
    pub fn get_queues(&self) -> Vec<IngestionQueue> {
        self.inner.queues.snapshots()
    }

    /// Copy of the tenant's chain; empty for a tenant with no records.
    pub fn get_hash_chain(&self, tenant_id: &str) -> Result<Vec<ChainLink>, EngineError> {
        Ok(self.inner.ledger.chain(tenant_id)?)
    }

    pub fn verify_hash_chain(&self, tenant_id: &str) -> Result<ChainVerification, EngineError> {
        Ok(self.inner.ledger.verify(tenant_id)?)
    }

    /// Verify the chain and that it was built from exactly `record_hashes`,
    /// e.g. the content hashes of the records a sink holds.
    pub fn verify_records(&self, tenant_id: &str, record_hashes: &[String]) -> Result<ChainVerification, EngineError> {
        let links = self.inner.ledger.chain(tenant_id)?;
        Ok(verify_record_hashes(&links, record_hashes))
    }

    pub fn quarantined_records(&self, job_id: &str) -> Result<Vec<QuarantinedRecord>, EngineError> {
        self.inner.jobs.get(job_id)?;
        Ok(self.inner.jobs.quarantined(job_id))
    }

    /// Completion handle for the job's current run.
    pub fn subscribe(&self, job_id: &str) -> Result<JobCompletion, EngineError> {
        self.inner
            .runtime()
            .completions
            .get(job_id)
            .map(|tx| JobCompletion::new(tx.subscribe()))
            .ok_or_else(|| EngineError::JobNotFound(job_id.to_string()))
    }

    /// Every lifecycle event from now on.
    pub fn events(&self) -> broadcast::Receiver<JobEvent> {
        self.inner.events.subscribe()
    }

    pub fn scheduler_metrics(&self) -> SchedulerMetrics {
        self.inner.metrics().clone()
    }
}
