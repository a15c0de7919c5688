//! Job lifecycle store: the job table plus per-job quarantine lists.
//!
//! Every status change goes through [`JobStore::transition`], which enforces
//! the lifecycle under the table's write lock.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use ledgerflow_core::{IngestionJob, JobStatus};
use serde::Serialize;
use serde_json::Value;

use crate::error::EngineError;

/// A record set aside by the pipeline instead of being chained.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuarantinedRecord {
    pub data: Value,
    pub reasons: Vec<String>,
    pub quarantined_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct JobStore {
    jobs: RwLock<IndexMap<String, IngestionJob>>,
    quarantine: RwLock<HashMap<String, Vec<QuarantinedRecord>>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, IndexMap<String, IngestionJob>> {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, IndexMap<String, IngestionJob>> {
        self.jobs.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, job: IngestionJob) {
        self.write().insert(job.id.clone(), job);
    }

    /// Drop a job that never made it into a lane.
    pub fn discard(&self, job_id: &str) {
        self.write().shift_remove(job_id);
        self.quarantine
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(job_id);
    }

    pub fn get(&self, job_id: &str) -> Result<IngestionJob, EngineError> {
        self.read()
            .get(job_id)
            .cloned()
            .ok_or_else(|| EngineError::JobNotFound(job_id.to_string()))
    }

    pub fn status(&self, job_id: &str) -> Option<JobStatus> {
        self.read().get(job_id).map(|j| j.status)
    }

    /// Jobs in creation order, optionally for one tenant.
    pub fn list(&self, tenant_id: Option<&str>) -> Vec<IngestionJob> {
        self.read()
            .values()
            .filter(|j| tenant_id.map_or(true, |t| j.tenant_id == t))
            .cloned()
            .collect()
    }

    /// Move a job to `to`, applying `apply` in the same critical section.
    ///
    /// Fails with `INVALID_STATE_TRANSITION` when the lifecycle forbids the
    /// move from the job's current status.
    pub fn transition(
        &self,
        job_id: &str,
        to: JobStatus,
        action: &'static str,
        apply: impl FnOnce(&mut IngestionJob),
    ) -> Result<IngestionJob, EngineError> {
        let mut jobs = self.write();
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| EngineError::JobNotFound(job_id.to_string()))?;
        if !job.status.can_transition_to(to) {
            return Err(EngineError::InvalidStateTransition {
                job_id: job_id.to_string(),
                from: job.status,
                action,
            });
        }
        job.status = to;
        apply(job);
        Ok(job.clone())
    }

    /// Mutate a job without touching its status.
    pub fn update<R>(&self, job_id: &str, apply: impl FnOnce(&mut IngestionJob) -> R) -> Option<R> {
        self.write().get_mut(job_id).map(apply)
    }

    /// Put back a snapshot taken before a resubmission that could not be
    /// admitted. Only applies while the job is still PENDING.
    pub fn restore(&self, snapshot: IngestionJob) {
        let mut jobs = self.write();
        if let Some(job) = jobs.get_mut(&snapshot.id) {
            if job.status == JobStatus::Pending {
                *job = snapshot;
            }
        }
    }

    pub fn add_quarantined(&self, job_id: &str, record: QuarantinedRecord) {
        self.quarantine
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(job_id.to_string())
            .or_default()
            .push(record);
    }

    pub fn quarantined(&self, job_id: &str) -> Vec<QuarantinedRecord> {
        self.quarantine
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(job_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Remove finished jobs whose `completed_at` is before `cutoff`,
    /// together with their quarantine lists.
    pub fn purge(&self, cutoff: DateTime<Utc>) -> Vec<IngestionJob> {
        let mut jobs = self.write();
        let expired: Vec<String> = jobs
            .values()
            .filter(|j| j.status.is_terminal() && j.completed_at.is_some_and(|at| at < cutoff))
            .map(|j| j.id.clone())
            .collect();
        if expired.is_empty() {
            return Vec::new();
        }

        let mut quarantine = self.quarantine.write().unwrap_or_else(PoisonError::into_inner);
        expired
            .iter()
            .filter_map(|id| {
                quarantine.remove(id);
                jobs.shift_remove(id)
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use ledgerflow_core::{JobConfig, JobType, Priority};
    use serde_json::json;

    fn job(tenant: &str) -> IngestionJob {
        IngestionJob::new("src", tenant, JobType::Batch, Priority::Medium, JobConfig::default(), Utc::now())
    }

    #[test]
    fn transition_enforces_lifecycle() {
        let store = JobStore::new();
        let j = job("t1");
        let id = j.id.clone();
        store.insert(j);

        let err = store.transition(&id, JobStatus::Paused, "pause", |_| {}).unwrap_err();
        assert_eq!(err.code(), "INVALID_STATE_TRANSITION");
        assert_eq!(store.status(&id), Some(JobStatus::Pending));

        let now = Utc::now();
        let running = store
            .transition(&id, JobStatus::Running, "start", |j| j.started_at = Some(now))
            .unwrap();
        assert_eq!(running.status, JobStatus::Running);
        assert_eq!(running.started_at, Some(now));

        assert_eq!(
            store.transition("missing", JobStatus::Running, "start", |_| {}).unwrap_err().code(),
            "JOB_NOT_FOUND"
        );
    }

    #[test]
    fn list_filters_by_tenant_in_creation_order() {
        let store = JobStore::new();
        let a = job("t1");
        let b = job("t2");
        let c = job("t1");
        let expected = vec![a.id.clone(), c.id.clone()];
        store.insert(a);
        store.insert(b);
        store.insert(c);
        let ids: Vec<String> = store.list(Some("t1")).into_iter().map(|j| j.id).collect();
        assert_eq!(ids, expected);
        assert_eq!(store.list(None).len(), 3);
    }

    #[test]
    fn purge_only_removes_old_finished_jobs() {
        let store = JobStore::new();
        let now = Utc::now();

        let mut old = job("t1");
        old.status = JobStatus::Completed;
        old.completed_at = Some(now - Duration::hours(30));
        let mut fresh = job("t1");
        fresh.status = JobStatus::Failed;
        fresh.completed_at = Some(now - Duration::hours(1));
        let pending = job("t1");

        let old_id = old.id.clone();
        store.insert(old);
        store.insert(fresh);
        store.insert(pending);
        store.add_quarantined(
            &old_id,
            QuarantinedRecord {
                data: json!({"a": 1}),
                reasons: vec!["bad".into()],
                quarantined_at: now,
            },
        );

        let purged = store.purge(now - Duration::hours(24));
        assert_eq!(purged.len(), 1);
        assert_eq!(purged[0].id, old_id);
        assert_eq!(store.len(), 2);
        assert!(store.quarantined(&old_id).is_empty());
    }

    #[test]
    fn restore_only_while_pending() {
        let store = JobStore::new();
        let mut j = job("t1");
        j.status = JobStatus::Failed;
        j.error_count = 1;
        let id = j.id.clone();
        let snapshot = j.clone();
        store.insert(j);

        store
            .transition(&id, JobStatus::Pending, "retry", |j| j.attempt += 1)
            .unwrap();
        store.restore(snapshot);
        let back = store.get(&id).unwrap();
        assert_eq!(back.status, JobStatus::Failed);
        assert_eq!(back.attempt, 0);
    }
}
