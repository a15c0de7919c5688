//! [`IngestionEngine`]: the job control API over the source registry, job
//! store, priority lanes, scheduler and ledger.
//!
//! The engine is a cheap-to-clone handle. All state lives in one
//! [`EngineInner`] shared with the scheduler loop and the job tasks; locks
//! are std locks and are never held across an `.await`.

mod builder;
mod control;
mod query;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ledgerflow_core::{EngineConfig, IngestionJob};
use ledgerflow_ledger::HashChainLedger;
use ledgerflow_pipeline::{PipelineExtensions, PipelineSettings};
use ledgerflow_queue::QueueManager;
use serde_json::Value;
use tokio::sync::{broadcast, watch};

pub use builder::EngineBuilder;
pub use control::CreateJobRequest;

use crate::audit::{self, AuditCategory, AuditEntry, AuditLogger, AuditSeverity};
use crate::clock::Clock;
use crate::connector::ConnectorRegistry;
use crate::events::{JobEvent, JobEventKind, JobOutcome};
use crate::registry::SourceRegistry;
use crate::schedule::ScheduleTrigger;
use crate::scheduler::{ActiveRun, Control, SchedulerMetrics, Ticker};
use crate::sink::RecordSink;
use crate::store::JobStore;

/// Capacity of the lifecycle event fan-out.
const EVENT_BUFFER: usize = 1_024;

/// Handle to a running ingestion engine.
#[derive(Clone)]
pub struct IngestionEngine {
    pub(crate) inner: Arc<EngineInner>,
}

impl IngestionEngine {
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }
}

/// Execution bookkeeping that only the scheduler and the job tasks touch.
#[derive(Default)]
pub(crate) struct RuntimeState {
    /// Jobs with a live stream task. A job in here is never started again.
    pub(crate) processing: HashSet<String>,
    /// Control channel of each live task.
    pub(crate) controls: HashMap<String, watch::Sender<Control>>,
    /// Runs parked by a pause, continued by the next start.
    pub(crate) suspended: HashMap<String, ActiveRun>,
    /// Terminal outcome of each job's current run.
    pub(crate) completions: HashMap<String, watch::Sender<Option<JobOutcome>>>,
}

pub(crate) struct EngineInner {
    pub(crate) config: EngineConfig,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) audit: Arc<dyn AuditLogger>,
    pub(crate) connectors: ConnectorRegistry,
    pub(crate) sink: Arc<dyn RecordSink>,
    pub(crate) trigger: Arc<dyn ScheduleTrigger>,
    pub(crate) extensions: PipelineExtensions,
    pub(crate) settings: PipelineSettings,
    pub(crate) sources: SourceRegistry,
    pub(crate) jobs: JobStore,
    pub(crate) queues: QueueManager,
    pub(crate) ledger: HashChainLedger,
    pub(crate) runtime: Mutex<RuntimeState>,
    pub(crate) events: broadcast::Sender<JobEvent>,
    pub(crate) metrics: Mutex<SchedulerMetrics>,
    /// Held for the duration of a tick; a second tick skips instead of waiting.
    pub(crate) tick_lock: Mutex<()>,
    pub(crate) ticker: Mutex<Option<Ticker>>,
}

impl EngineInner {
    pub(crate) fn runtime(&self) -> MutexGuard<'_, RuntimeState> {
        self.runtime.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn metrics(&self) -> MutexGuard<'_, SchedulerMetrics> {
        self.metrics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn emit(&self, job: &IngestionJob, kind: JobEventKind) {
        // No subscribers is not an error.
        let _ = self.events.send(JobEvent::new(job, kind, self.clock.now()));
    }

    /// Forget the live task of `job_id`.
    pub(crate) fn release(&self, job_id: &str) {
        let mut runtime = self.runtime();
        runtime.processing.remove(job_id);
        runtime.controls.remove(job_id);
    }

    /// Publish the terminal outcome of `job`'s run. Called exactly once per
    /// run, by whoever won the store transition into the terminal status.
    pub(crate) fn settle(&self, job: &IngestionJob, kind: JobEventKind) {
        if let Some(tx) = self.runtime().completions.get(&job.id) {
            tx.send_replace(Some(JobOutcome::from(job)));
        }
        self.metrics().record_run(job, self.clock.now());
        self.emit(job, kind);
    }

    pub(crate) async fn audit_job(&self, job: &IngestionJob, action: &str, severity: AuditSeverity, details: Value) {
        let entry = AuditEntry {
            tenant_id: job.tenant_id.clone(),
            user_id: job.created_by.clone().unwrap_or_else(|| "system".to_string()),
            action: action.to_string(),
            details,
            category: AuditCategory::IngestionJob,
            severity,
            timestamp: self.clock.now(),
        };
        audit::record(&self.audit, entry).await;
    }
}
