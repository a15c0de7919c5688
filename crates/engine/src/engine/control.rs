//! Mutating half of the job control API.

use ledgerflow_core::{DataSource, IngestionJob, JobConfig, JobStatus, JobType, Priority};
use ledgerflow_pipeline::RecordPipeline;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::watch;
use tracing::{info, warn};

use super::IngestionEngine;
use crate::audit::{self, AuditCategory, AuditEntry, AuditSeverity};
use crate::error::EngineError;
use crate::events::JobEventKind;
use crate::scheduler::Control;
use crate::schedule;

/// Parameters of [`IngestionEngine::create_ingestion_job`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateJobRequest {
    pub source_id: String,
    pub tenant_id: String,
    pub job_type: JobType,
    pub priority: Priority,
    #[serde(default)]
    pub config: JobConfig,
    #[serde(default)]
    pub created_by: Option<String>,
}

impl CreateJobRequest {
    pub fn new(source_id: impl Into<String>, tenant_id: impl Into<String>, priority: Priority) -> Self {
        Self {
            source_id: source_id.into(),
            tenant_id: tenant_id.into(),
            job_type: JobType::Batch,
            priority,
            config: JobConfig::default(),
            created_by: None,
        }
    }

    pub fn job_type(mut self, job_type: JobType) -> Self {
        self.job_type = job_type;
        self
    }

    pub fn config(mut self, config: JobConfig) -> Self {
        self.config = config;
        self
    }

    pub fn created_by(mut self, user: impl Into<String>) -> Self {
        self.created_by = Some(user.into());
        self
    }
}

impl IngestionEngine {
    /// Validate and register a source, then audit the registration.
    pub async fn register_data_source(&self, source: DataSource) -> Result<DataSource, EngineError> {
        let inner = &self.inner;
        let source = inner.sources.register(source)?;
        info!(
            source_id = %source.id,
            tenant_id = %source.tenant_id,
            source_type = %source.source_type,
            "data source registered"
        );
        let entry = AuditEntry {
            tenant_id: source.tenant_id.clone(),
            user_id: "system".to_string(),
            action: "source.register".to_string(),
            details: json!({
                "source_id": source.id,
                "name": source.name,
                "source_type": source.source_type,
                "encrypted": source.encryption.enabled,
            }),
            category: AuditCategory::DataSource,
            severity: AuditSeverity::Info,
            timestamp: inner.clock.now(),
        };
        audit::record(&inner.audit, entry).await;
        Ok(source)
    }

    /// Ask the source's connector whether the source is reachable.
    pub async fn test_connection(&self, source_id: &str) -> Result<bool, EngineError> {
        let source = self.inner.sources.get(source_id)?;
        let connector = self.inner.connectors.get(source.source_type)?;
        Ok(connector.test_connection(&source).await?)
    }

    /// Inactive sources keep their jobs but accept no new ones.
    pub fn set_source_active(&self, source_id: &str, active: bool) -> Result<(), EngineError> {
        self.inner.sources.set_active(source_id, active)
    }

    /// Create a job for a registered source and admit it into its lane.
    ///
    /// Scheduled jobs are not admitted: their next run is computed and
    /// handed to the schedule trigger, which later calls [`queue_job`].
    ///
    /// [`queue_job`]: IngestionEngine::queue_job
    pub async fn create_ingestion_job(&self, request: CreateJobRequest) -> Result<IngestionJob, EngineError> {
        let inner = &self.inner;
        let source = inner.sources.get(&request.source_id)?;
        if source.tenant_id != request.tenant_id {
            // Other tenants' sources are invisible.
            return Err(EngineError::SourceNotFound(request.source_id));
        }
        if !source.is_active {
            return Err(EngineError::SourceInactive(source.id));
        }
        inner.connectors.get(source.source_type)?;

        let now = inner.clock.now();
        let mut job = IngestionJob::new(
            &source.id,
            &request.tenant_id,
            request.job_type,
            request.priority,
            request.config,
            now,
        );
        job.created_by = request.created_by;
        validate_job_config(&job)?;
        RecordPipeline::new(&source, &job, &inner.extensions, &inner.settings)?;

        if job.job_type == JobType::Scheduled {
            let schedule = job
                .config
                .schedule
                .as_ref()
                .ok_or_else(|| EngineError::InvalidJobConfig("scheduled job without a schedule".into()))?;
            job.next_run = schedule::next_run(schedule, now).map_err(EngineError::InvalidJobConfig)?;
            self.insert_job(job.clone());
        } else {
            job.attempt = 1;
            self.insert_job(job.clone());
            if let Err(e) = inner.queues.admit(&job.id, job.priority) {
                inner.jobs.discard(&job.id);
                inner.runtime().completions.remove(&job.id);
                return Err(e.into());
            }
        }

        info!(
            job_id = %job.id,
            tenant_id = %job.tenant_id,
            source_id = %job.source_id,
            lane = %job.priority,
            job_type = ?job.job_type,
            "ingestion job created"
        );
        inner.emit(&job, JobEventKind::Created);
        if let Some(next_run) = job.next_run {
            inner.trigger.schedule(&job.id, next_run).await;
        } else if job.job_type != JobType::Scheduled {
            inner.emit(&job, JobEventKind::Queued);
        }
        inner
            .audit_job(
                &job,
                "job.create",
                AuditSeverity::Info,
                json!({ "source_id": job.source_id, "priority": job.priority, "job_type": job.job_type }),
            )
            .await;
        Ok(job)
    }

    fn insert_job(&self, job: IngestionJob) {
        let (tx, _) = watch::channel(None);
        self.inner.runtime().completions.insert(job.id.clone(), tx);
        self.inner.jobs.insert(job);
    }

    /// Admit a job into its lane. Used by the schedule trigger for scheduled
    /// jobs, and to resubmit a finished run.
    pub async fn queue_job(&self, job_id: &str) -> Result<IngestionJob, EngineError> {
        let inner = &self.inner;
        let current = inner.jobs.get(job_id)?;
        let job = match current.status {
            JobStatus::Pending => {
                inner.queues.admit(job_id, current.priority)?;
                inner
                    .jobs
                    .update(job_id, |j| {
                        j.attempt += 1;
                        j.clone()
                    })
                    .ok_or_else(|| EngineError::JobNotFound(job_id.to_string()))?
            }
            JobStatus::Failed if current.error_count > current.config.retry.max_retries => {
                return Err(EngineError::RetryLimitExceeded {
                    job_id: job_id.to_string(),
                    attempts: current.error_count,
                    max_retries: current.config.retry.max_retries,
                })
            }
            JobStatus::Completed | JobStatus::Failed => self.resubmit(current, "queue")?,
            from => {
                return Err(EngineError::InvalidStateTransition {
                    job_id: job_id.to_string(),
                    from,
                    action: "queue",
                })
            }
        };
        inner.emit(&job, JobEventKind::Queued);

        if let Some(schedule) = job.config.schedule.as_ref().filter(|_| job.job_type == JobType::Scheduled) {
            match schedule::next_run(schedule, inner.clock.now()) {
                Ok(next_run) => {
                    inner.jobs.update(job_id, |j| j.next_run = next_run);
                    if let Some(next_run) = next_run {
                        inner.trigger.schedule(job_id, next_run).await;
                    }
                }
                Err(e) => warn!(job_id = %job_id, error = %e, "could not compute next run"),
            }
        }
        inner
            .audit_job(&job, "job.queue", AuditSeverity::Info, json!({ "attempt": job.attempt }))
            .await;
        Ok(job)
    }

    /// FAILED or COMPLETED → PENDING with fresh run counters, admitted at
    /// the job's priority. Restores the job if the lane is full.
    fn resubmit(&self, previous: IngestionJob, action: &'static str) -> Result<IngestionJob, EngineError> {
        let inner = &self.inner;
        let job = inner.jobs.transition(&previous.id, JobStatus::Pending, action, |j| {
            j.reset_run();
            j.attempt += 1;
        })?;
        if let Err(e) = inner.queues.admit(&job.id, job.priority) {
            inner.jobs.restore(previous);
            return Err(e.into());
        }
        if let Some(tx) = inner.runtime().completions.get(&job.id) {
            tx.send_replace(None);
        }
        Ok(job)
    }

    /// RUNNING → PAUSED. The task flushes its progress and parks the run;
    /// nothing buffered is lost.
    pub async fn pause_job(&self, job_id: &str) -> Result<IngestionJob, EngineError> {
        let inner = &self.inner;
        let job = inner.jobs.transition(job_id, JobStatus::Paused, "pause", |_| {})?;
        if let Some(control) = inner.runtime().controls.get(job_id) {
            control.send_replace(Control::Pause);
        }
        info!(job_id = %job_id, tenant_id = %job.tenant_id, "job paused");
        inner.emit(&job, JobEventKind::Paused);
        inner
            .audit_job(&job, "job.pause", AuditSeverity::Info, json!({ "progress": job.progress }))
            .await;
        Ok(job)
    }

    /// PAUSED → PENDING, re-admitted into the same lane. On `QUEUE_FULL`
    /// the job stays PAUSED.
    pub async fn resume_job(&self, job_id: &str) -> Result<IngestionJob, EngineError> {
        let inner = &self.inner;
        let job = inner.jobs.transition(job_id, JobStatus::Pending, "resume", |_| {})?;
        if let Err(e) = inner.queues.admit(job_id, job.priority) {
            inner.jobs.update(job_id, |j| {
                if j.status == JobStatus::Pending {
                    j.status = JobStatus::Paused;
                }
            });
            return Err(e.into());
        }
        info!(job_id = %job_id, tenant_id = %job.tenant_id, lane = %job.priority, "job resumed");
        inner.emit(&job, JobEventKind::Resumed);
        inner.audit_job(&job, "job.resume", AuditSeverity::Info, json!({})).await;
        Ok(job)
    }

    /// Cancel a PENDING, RUNNING or PAUSED job. Takes effect immediately:
    /// the job leaves its lane and the processing set, and a running task
    /// stops before sealing its in-flight record.
    pub async fn cancel_job(&self, job_id: &str) -> Result<IngestionJob, EngineError> {
        let inner = &self.inner;
        let now = inner.clock.now();
        let job = inner.jobs.transition(job_id, JobStatus::Cancelled, "cancel", |j| {
            j.completed_at = Some(now);
        })?;
        inner.queues.remove(job_id);
        {
            let mut runtime = inner.runtime();
            if let Some(control) = runtime.controls.remove(job_id) {
                control.send_replace(Control::Cancel);
            }
            runtime.processing.remove(job_id);
            runtime.suspended.remove(job_id);
        }
        info!(job_id = %job_id, tenant_id = %job.tenant_id, "job cancelled");
        inner.settle(&job, JobEventKind::Cancelled);
        inner
            .audit_job(&job, "job.cancel", AuditSeverity::Warning, json!({ "progress": job.progress }))
            .await;
        Ok(job)
    }

    /// Resubmit a FAILED job. Refused with `RETRY_LIMIT_EXCEEDED` once the
    /// job has failed more than `max_retries` times.
    pub async fn retry_job(&self, job_id: &str) -> Result<IngestionJob, EngineError> {
        let inner = &self.inner;
        let current = inner.jobs.get(job_id)?;
        if current.status != JobStatus::Failed {
            return Err(EngineError::InvalidStateTransition {
                job_id: job_id.to_string(),
                from: current.status,
                action: "retry",
            });
        }
        let max_retries = current.config.retry.max_retries;
        if current.error_count > max_retries {
            inner.queues.dead_letter(current.priority, job_id);
            return Err(EngineError::RetryLimitExceeded {
                job_id: job_id.to_string(),
                attempts: current.error_count,
                max_retries,
            });
        }

        let job = self.resubmit(current, "retry")?;
        info!(
            job_id = %job_id,
            attempt = job.attempt,
            error_count = job.error_count,
            delay_ms = job.config.retry.delay_for(job.error_count).as_millis() as u64,
            "job resubmitted"
        );
        inner.emit(&job, JobEventKind::Retried);
        inner
            .audit_job(
                &job,
                "job.retry",
                AuditSeverity::Info,
                json!({ "attempt": job.attempt, "error_count": job.error_count }),
            )
            .await;
        Ok(job)
    }
}

fn validate_job_config(job: &IngestionJob) -> Result<(), EngineError> {
    let config = &job.config;
    if config.batch_size == 0 {
        return Err(EngineError::InvalidJobConfig("batch_size must be > 0".into()));
    }
    let threshold = config.validation.quarantine_threshold;
    if !(0.0..=1.0).contains(&threshold) {
        return Err(EngineError::InvalidJobConfig(format!(
            "quarantine_threshold {threshold} outside [0, 1]"
        )));
    }
    if config.dedup.enabled && config.dedup.window == 0 {
        return Err(EngineError::InvalidJobConfig("dedup window must be > 0".into()));
    }
    if let Some(min) = config.quality.min_score {
        if !(0.0..=1.0).contains(&min) {
            return Err(EngineError::InvalidJobConfig(format!("min_score {min} outside [0, 1]")));
        }
    }
    Ok(())
}
