//! Job lifecycle notifications.
//!
//! Every job has a `watch` channel carrying its terminal outcome, fired
//! exactly once per run, and the engine fans all lifecycle changes out on a
//! `broadcast` channel.

use chrono::{DateTime, Utc};
use ledgerflow_core::{IngestionJob, JobProgress, JobStatus};
use serde::Serialize;
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobEventKind {
    Created,
    Queued,
    Started,
    Paused,
    Resumed,
    Completed,
    Failed { error: String },
    Cancelled,
    Retried,
    DeadLettered,
    Purged,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobEvent {
    pub job_id: String,
    pub tenant_id: String,
    #[serde(flatten)]
    pub kind: JobEventKind,
    pub at: DateTime<Utc>,
}

impl JobEvent {
    pub fn new(job: &IngestionJob, kind: JobEventKind, at: DateTime<Utc>) -> Self {
        Self {
            job_id: job.id.clone(),
            tenant_id: job.tenant_id.clone(),
            kind,
            at,
        }
    }
}

/// Terminal state of one job run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobOutcome {
    pub job_id: String,
    pub status: JobStatus,
    pub error: Option<String>,
    pub progress: JobProgress,
}

impl From<&IngestionJob> for JobOutcome {
    fn from(job: &IngestionJob) -> Self {
        Self {
            job_id: job.id.clone(),
            status: job.status,
            error: if job.status == JobStatus::Failed {
                job.last_error.clone()
            } else {
                None
            },
            progress: job.progress.clone(),
        }
    }
}

/// Resolves once the job's current run reaches a terminal status.
#[derive(Debug, Clone)]
pub struct JobCompletion {
    rx: watch::Receiver<Option<JobOutcome>>,
}

impl JobCompletion {
    pub(crate) fn new(rx: watch::Receiver<Option<JobOutcome>>) -> Self {
        Self { rx }
    }

    /// Wait for the outcome. `None` when the job was purged first.
    pub async fn wait(mut self) -> Option<JobOutcome> {
        let outcome = self.rx.wait_for(Option::is_some).await.ok()?.clone();
        outcome
    }

    /// The outcome if the run has already finished.
    pub fn try_outcome(&self) -> Option<JobOutcome> {
        self.rx.borrow().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerflow_core::{JobConfig, JobType, Priority};

    #[tokio::test]
    async fn completion_resolves_with_outcome() {
        let (tx, rx) = watch::channel(None);
        let completion = JobCompletion::new(rx);
        assert!(completion.try_outcome().is_none());

        let mut job = IngestionJob::new("s", "t", JobType::Batch, Priority::Low, JobConfig::default(), Utc::now());
        job.status = JobStatus::Failed;
        job.last_error = Some("boom".into());
        tx.send_replace(Some(JobOutcome::from(&job)));

        let outcome = completion.wait().await.unwrap();
        assert_eq!(outcome.status, JobStatus::Failed);
        assert_eq!(outcome.error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn completion_is_none_when_sender_dropped() {
        let (tx, rx) = watch::channel::<Option<JobOutcome>>(None);
        let completion = JobCompletion::new(rx);
        drop(tx);
        assert!(completion.wait().await.is_none());
    }

    #[test]
    fn event_serializes_flat() {
        let job = IngestionJob::new("s", "t", JobType::Batch, Priority::Low, JobConfig::default(), Utc::now());
        let event = JobEvent::new(&job, JobEventKind::Failed { error: "x".into() }, Utc::now());
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "failed");
        assert_eq!(json["error"], "x");
        assert_eq!(json["tenant_id"], "t");
    }
}
