//! Job scheduler: the tick that moves jobs from the lanes into running
//! stream tasks, and the background loop that drives it.
//!
//! Each tick reconciles lane occupancy with the job store, walks the lanes
//! in strict priority order starting at most one job per lane, and purges
//! finished jobs past the retention window. Ticks never overlap and never
//! wait for the tasks they spawn.

mod execution;
pub mod metrics;

#[cfg(test)]
mod tests;

use std::sync::{Arc, PoisonError, TryLockError};

use chrono::{DateTime, Utc};
use ledgerflow_core::{JobStatus, Priority};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

pub use metrics::{RunTotals, SchedulerMetrics};
pub(crate) use execution::{ActiveRun, Control};

use crate::engine::IngestionEngine;
use crate::events::JobEventKind;

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TickReport {
    /// Another tick was in progress; this one did nothing.
    pub skipped: bool,
    /// Jobs moved to RUNNING, in lane order.
    pub started: Vec<String>,
    /// Popped jobs put back because their previous run is still winding down.
    pub deferred: Vec<String>,
    pub purged: Vec<String>,
    /// Pending jobs per lane after reconciliation.
    pub occupancy: [usize; 4],
}

/// Background tick loop.
pub(crate) struct Ticker {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl IngestionEngine {
    /// Run one scheduling pass. Must be called inside a tokio runtime.
    pub fn tick(&self) -> TickReport {
        let inner = &self.inner;
        let _guard = match inner.tick_lock.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                debug!("tick skipped: previous tick still running");
                return TickReport {
                    skipped: true,
                    ..Default::default()
                };
            }
        };

        let now = inner.clock.now();
        let occupancy = inner
            .queues
            .recompute_occupancy(|id| inner.jobs.status(id) == Some(JobStatus::Pending));
        let mut report = TickReport {
            occupancy,
            ..Default::default()
        };

        for priority in Priority::ALL {
            while let Some(job_id) = inner.queues.next_eligible(priority) {
                let busy = inner.runtime().processing.contains(&job_id);
                if busy {
                    inner.queues.requeue_front(priority, &job_id);
                    debug!(job_id = %job_id, lane = %priority, "previous run still active, deferred");
                    report.deferred.push(job_id);
                    break;
                }
                if self.launch(&job_id, now) {
                    report.started.push(job_id);
                    break;
                }
            }
        }

        report.purged = self.purge_expired(now);

        let mut metrics = inner.metrics();
        metrics.ticks += 1;
        metrics.jobs_started += report.started.len() as u64;
        metrics.jobs_purged += report.purged.len() as u64;
        metrics.record_occupancy(occupancy);
        report
    }

    /// Mark `job_id` RUNNING and spawn its stream task. `false` when the
    /// lane entry was stale (the job left PENDING after admission).
    fn launch(&self, job_id: &str, now: DateTime<Utc>) -> bool {
        let inner = &self.inner;
        let (control_tx, control_rx) = watch::channel(Control::Run);
        {
            let mut runtime = inner.runtime();
            runtime.processing.insert(job_id.to_string());
            runtime.controls.insert(job_id.to_string(), control_tx);
        }

        let job = match inner.jobs.transition(job_id, JobStatus::Running, "start", |job| {
            job.started_at.get_or_insert(now);
        }) {
            Ok(job) => job,
            Err(e) => {
                debug!(job_id = %job_id, error = %e, "stale lane entry dropped");
                inner.release(job_id);
                return false;
            }
        };

        let parked = inner.runtime().suspended.remove(job_id);
        info!(
            job_id = %job.id,
            tenant_id = %job.tenant_id,
            lane = %job.priority,
            attempt = job.attempt,
            resumed = parked.is_some(),
            "job started"
        );
        inner.emit(&job, JobEventKind::Started);
        tokio::spawn(execution::run(Arc::clone(inner), job, parked, control_rx));
        true
    }

    /// Drop finished jobs older than the retention window from the job
    /// table. Ledger links are never touched.
    fn purge_expired(&self, now: DateTime<Utc>) -> Vec<String> {
        let inner = &self.inner;
        let purged = inner.jobs.purge(now - inner.config.job_retention());
        for job in &purged {
            inner.queues.forget(&job.id);
            {
                let mut runtime = inner.runtime();
                runtime.completions.remove(&job.id);
                runtime.suspended.remove(&job.id);
            }
            inner.emit(job, JobEventKind::Purged);
        }
        if !purged.is_empty() {
            info!(count = purged.len(), "purged expired jobs");
        }
        purged.into_iter().map(|job| job.id).collect()
    }

    /// Start the background tick loop. Returns `false` if already running.
    pub fn start(&self) -> bool {
        let mut ticker = self.inner.ticker.lock().unwrap_or_else(PoisonError::into_inner);
        if ticker.is_some() {
            return false;
        }

        let (stop, mut stopped) = watch::channel(false);
        let engine = self.clone();
        let period = self.inner.config.tick_interval();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(tick_ms = period.as_millis() as u64, "scheduler started");
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        engine.tick();
                    }
                    _ = stopped.changed() => break,
                }
            }
            info!("scheduler stopped");
        });
        *ticker = Some(Ticker { stop, handle });
        true
    }

    /// Stop the tick loop. Running job tasks finish on their own.
    pub async fn shutdown(&self) {
        let ticker = self.inner.ticker.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(ticker) = ticker {
            let _ = ticker.stop.send(true);
            if let Err(e) = ticker.handle.await {
                warn!(error = %e, "scheduler loop ended abnormally");
            }
        }
    }

    pub fn is_scheduling(&self) -> bool {
        self.inner
            .ticker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}
