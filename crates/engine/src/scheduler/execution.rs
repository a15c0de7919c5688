//! One job run: connector stream → bounded buffer → pipeline → ledger → sink.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use ledgerflow_core::{IngestionJob, JobMetrics, JobProgress, JobStatus};
use ledgerflow_pipeline::{seal, RecordOutcome, RecordPipeline};
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::audit::AuditSeverity;
use crate::connector::RecordStream;
use crate::engine::EngineInner;
use crate::error::{ConnectorError, EngineError};
use crate::events::JobEventKind;
use crate::store::QuarantinedRecord;

/// Signal from the control API to a live job task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Control {
    Run,
    Pause,
    Cancel,
}

/// Why a run stopped early.
enum Stop {
    Cancelled,
    Failed(String),
}

/// Counters of the current run, flushed to the job table in batches.
#[derive(Debug, Default)]
struct RunStats {
    progress: JobProgress,
    total_hint: Option<u64>,
    latency_total_ms: f64,
    quality_total: f64,
}

impl RunStats {
    fn snapshot(&self, elapsed: Duration) -> (JobProgress, JobMetrics) {
        let mut progress = self.progress.clone();
        progress.total_records = self
            .total_hint
            .unwrap_or(progress.processed_records)
            .max(progress.processed_records);
        progress.recompute_percentage();

        let processed = progress.processed_records as f64;
        let secs = elapsed.as_secs_f64();
        let metrics = JobMetrics {
            throughput: if secs > 0.0 { processed / secs } else { 0.0 },
            avg_latency_ms: if processed > 0.0 { self.latency_total_ms / processed } else { 0.0 },
            error_rate: if processed > 0.0 {
                progress.failed_records as f64 / processed
            } else {
                0.0
            },
            quality_score: if progress.successful_records > 0 {
                self.quality_total / progress.successful_records as f64
            } else {
                0.0
            },
        };
        (progress, metrics)
    }

    /// Share of processed records in quarantine, when above `threshold`.
    fn quarantine_breach(&self, threshold: f64) -> Option<f64> {
        let p = &self.progress;
        if p.quarantined_records == 0 || p.processed_records == 0 {
            return None;
        }
        let ratio = p.quarantined_records as f64 / p.processed_records as f64;
        (ratio > threshold).then_some(ratio)
    }
}

/// A run's stream, pipeline state and counters. Parked as-is on pause so
/// the resumed run continues where it stopped.
pub(crate) struct ActiveRun {
    rx: mpsc::Receiver<Result<Value, ConnectorError>>,
    pipeline: RecordPipeline,
    producer: JoinHandle<()>,
    stats: RunStats,
    active_before: Duration,
    segment_start: Instant,
}

impl ActiveRun {
    fn elapsed(&self) -> Duration {
        self.active_before + self.segment_start.elapsed()
    }
}

impl Drop for ActiveRun {
    fn drop(&mut self) {
        self.producer.abort();
    }
}

/// Body of the task spawned for a RUNNING job.
pub(crate) async fn run(
    inner: Arc<EngineInner>,
    job: IngestionJob,
    parked: Option<ActiveRun>,
    mut control: watch::Receiver<Control>,
) {
    let resumed = parked.is_some();
    let mut run = match parked {
        Some(mut run) => {
            run.segment_start = Instant::now();
            run
        }
        None => match open(&inner, &job).await {
            Ok(run) => run,
            Err(reason) => {
                fail(&inner, &job, None, reason).await;
                return;
            }
        },
    };
    inner
        .audit_job(&job, "job.start", AuditSeverity::Info, json!({ "attempt": job.attempt, "resumed": resumed }))
        .await;

    let batch_size = job.config.batch_size.max(1) as u64;
    loop {
        tokio::select! {
            biased;

            changed = control.changed() => {
                let signal = if changed.is_ok() { *control.borrow_and_update() } else { Control::Cancel };
                match signal {
                    Control::Run => {}
                    Control::Pause => {
                        park(&inner, &job, run);
                        return;
                    }
                    Control::Cancel => {
                        debug!(job_id = %job.id, "run cancelled");
                        return;
                    }
                }
            }

            item = run.rx.recv() => match item {
                None => {
                    complete(&inner, &job, run).await;
                    return;
                }
                Some(Err(e)) => {
                    let reason = describe(EngineError::from(e));
                    fail(&inner, &job, Some(run), reason).await;
                    return;
                }
                Some(Ok(raw)) => {
                    let stepped = match step(&inner, &job, &mut run, &control, raw).await {
                        Ok(()) if run.stats.progress.processed_records % batch_size == 0 => flush(&inner, &job, &run),
                        other => other,
                    };
                    match stepped {
                        Ok(()) => {}
                        Err(Stop::Cancelled) => {
                            debug!(job_id = %job.id, "run cancelled before sealing in-flight record");
                            return;
                        }
                        Err(Stop::Failed(reason)) => {
                            fail(&inner, &job, Some(run), reason).await;
                            return;
                        }
                    }
                }
            }
        }
    }
}

fn describe(error: EngineError) -> String {
    format!("{}: {error}", error.code())
}

/// Resolve the source and connector, build the pipeline and start pumping
/// the connector stream into a bounded buffer.
async fn open(inner: &EngineInner, job: &IngestionJob) -> Result<ActiveRun, String> {
    let source = inner.sources.get(&job.source_id).map_err(describe)?;
    let connector = inner
        .connectors
        .get(source.source_type)
        .map_err(|e| describe(e.into()))?;
    let pipeline = RecordPipeline::new(&source, job, &inner.extensions, &inner.settings)
        .map_err(|e| describe(e.into()))?;
    let total_hint = connector.record_count_hint(&source).await;
    let stream = connector
        .open(&source, job)
        .await
        .map_err(|e| describe(e.into()))?;

    let (tx, rx) = mpsc::channel(inner.config.stream_buffer.max(1));
    let producer = tokio::spawn(pump(job.id.clone(), stream, tx));
    debug!(job_id = %job.id, source_id = %source.id, total_hint = ?total_hint, "stream opened");

    Ok(ActiveRun {
        rx,
        pipeline,
        producer,
        stats: RunStats {
            total_hint,
            ..Default::default()
        },
        active_before: Duration::ZERO,
        segment_start: Instant::now(),
    })
}

/// Forward the connector stream into the buffer. Blocks on a full buffer,
/// which is what throttles the connector. Stops after the first error.
async fn pump(job_id: String, mut stream: RecordStream, tx: mpsc::Sender<Result<Value, ConnectorError>>) {
    while let Some(item) = stream.next().await {
        let last = item.is_err();
        if tx.send(item).await.is_err() {
            trace!(job_id = %job_id, "consumer gone, producer stopping");
            return;
        }
        if last {
            return;
        }
    }
}

/// Run one raw record through the pipeline and act on the outcome.
async fn step(
    inner: &EngineInner,
    job: &IngestionJob,
    run: &mut ActiveRun,
    control: &watch::Receiver<Control>,
    raw: Value,
) -> Result<(), Stop> {
    let began = Instant::now();
    let now = inner.clock.now();
    let outcome = run.pipeline.process(raw, now).await;
    let stats = &mut run.stats;
    stats.progress.processed_records += 1;
    let position = stats.progress.processed_records;

    match outcome {
        RecordOutcome::Accepted(record) => {
            let cancelled = *control.borrow() == Control::Cancel
                || matches!(inner.jobs.status(&job.id), Some(JobStatus::Cancelled) | None);
            if cancelled {
                return Err(Stop::Cancelled);
            }
            let score = record.quality.score;
            let sealed = seal(*record, &inner.ledger).map_err(|e| Stop::Failed(describe(e.into())))?;
            trace!(job_id = %job.id, record_id = %sealed.id, chain_hash = %sealed.chain_hash, "record sealed");
            inner
                .sink
                .accept(sealed)
                .await
                .map_err(|e| Stop::Failed(format!("SINK_ERROR: {e}")))?;
            stats.progress.successful_records += 1;
            stats.quality_total += score;
        }
        RecordOutcome::Failed { reasons, fatal } => {
            stats.progress.failed_records += 1;
            if fatal {
                return Err(Stop::Failed(describe(EngineError::ValidationFailed(format!(
                    "record {position}: {}",
                    reasons.join("; ")
                )))));
            }
            debug!(job_id = %job.id, record = position, reasons = ?reasons, "record failed");
        }
        RecordOutcome::Skipped { reasons } => {
            stats.progress.failed_records += 1;
            debug!(job_id = %job.id, record = position, reasons = ?reasons, "record skipped");
        }
        RecordOutcome::Quarantined { data, reasons } => {
            stats.progress.quarantined_records += 1;
            debug!(job_id = %job.id, record = position, reasons = ?reasons, "record quarantined");
            inner.jobs.add_quarantined(
                &job.id,
                QuarantinedRecord {
                    data,
                    reasons,
                    quarantined_at: now,
                },
            );
        }
        RecordOutcome::Filtered { reason } => {
            stats.progress.filtered_records += 1;
            trace!(job_id = %job.id, record = position, reason = %reason, "record filtered");
        }
        RecordOutcome::Duplicate { key } => {
            stats.progress.duplicate_records += 1;
            trace!(job_id = %job.id, record = position, key = %key, "duplicate dropped");
        }
    }

    stats.latency_total_ms += began.elapsed().as_secs_f64() * 1_000.0;
    Ok(())
}

/// Write the run's counters to the job table and enforce the quarantine
/// threshold.
fn flush(inner: &EngineInner, job: &IngestionJob, run: &ActiveRun) -> Result<(), Stop> {
    let (progress, metrics) = run.stats.snapshot(run.elapsed());
    inner.jobs.update(&job.id, |j| {
        j.progress = progress;
        j.metrics = metrics;
    });

    let threshold = job.config.validation.quarantine_threshold;
    match run.stats.quarantine_breach(threshold) {
        Some(ratio) => Err(Stop::Failed(describe(EngineError::ValidationFailed(format!(
            "{:.1}% of records quarantined exceeds threshold {:.1}%",
            ratio * 100.0,
            threshold * 100.0
        ))))),
        None => Ok(()),
    }
}

/// Park the run for a later resume.
fn park(inner: &EngineInner, job: &IngestionJob, mut run: ActiveRun) {
    let (progress, metrics) = run.stats.snapshot(run.elapsed());
    let processed = progress.processed_records;
    inner.jobs.update(&job.id, |j| {
        j.progress = progress;
        j.metrics = metrics;
    });
    run.active_before = run.elapsed();

    // Lock order: runtime, then the job table.
    let mut runtime = inner.runtime();
    runtime.processing.remove(&job.id);
    runtime.controls.remove(&job.id);
    // A resume may already have moved the job back to PENDING.
    if matches!(inner.jobs.status(&job.id), Some(JobStatus::Paused | JobStatus::Pending)) {
        runtime.suspended.insert(job.id.clone(), run);
        info!(job_id = %job.id, processed, "run parked");
    }
}

/// The stream ended: final flush, then COMPLETED.
async fn complete(inner: &EngineInner, job: &IngestionJob, run: ActiveRun) {
    if let Err(Stop::Failed(reason)) = flush(inner, job, &run) {
        fail(inner, job, Some(run), reason).await;
        return;
    }

    let now = inner.clock.now();
    let (mut progress, metrics) = run.stats.snapshot(run.elapsed());
    progress.total_records = progress.processed_records;
    progress.percentage = 100.0;

    let done = inner.jobs.transition(&job.id, JobStatus::Completed, "complete", |j| {
        j.progress = progress;
        j.metrics = metrics;
        j.completed_at = Some(now);
    });
    match done {
        Ok(done) => {
            inner.release(&done.id);
            inner.sources.touch_ingested(&done.source_id, now);
            info!(
                job_id = %done.id,
                tenant_id = %done.tenant_id,
                processed = done.progress.processed_records,
                successful = done.progress.successful_records,
                failed = done.progress.failed_records,
                quarantined = done.progress.quarantined_records,
                "job completed"
            );
            inner.settle(&done, JobEventKind::Completed);
            inner
                .audit_job(&done, "job.complete", AuditSeverity::Info, json!({ "progress": done.progress }))
                .await;
        }
        Err(_) if inner.jobs.status(&job.id) == Some(JobStatus::Paused) => {
            // Paused while the stream drained; the resumed run completes.
            park(inner, job, run);
        }
        Err(e) => {
            debug!(job_id = %job.id, error = %e, "run ended after the job left RUNNING");
            inner.release(&job.id);
        }
    }
}

/// Record a run failure: FAILED, `error_count += 1`, and the dead-letter
/// lane once retries are exhausted.
async fn fail(inner: &EngineInner, job: &IngestionJob, run: Option<ActiveRun>, reason: String) {
    let now = inner.clock.now();
    let snapshot = run.as_ref().map(|r| r.stats.snapshot(r.elapsed()));
    drop(run);

    let record_failure = |j: &mut IngestionJob| {
        j.error_count += 1;
        j.last_error = Some(reason.clone());
        j.completed_at = Some(now);
        if let Some((progress, metrics)) = &snapshot {
            j.progress = progress.clone();
            j.metrics = metrics.clone();
        }
    };
    let failed = match inner.jobs.transition(&job.id, JobStatus::Failed, "fail", &record_failure) {
        Ok(failed) => Some(failed),
        // Paused, or paused and resumed, while the source was opening.
        Err(_) => inner
            .jobs
            .update(&job.id, |j| {
                matches!(j.status, JobStatus::Paused | JobStatus::Pending).then(|| {
                    record_failure(j);
                    j.status = JobStatus::Failed;
                    j.clone()
                })
            })
            .flatten(),
    };
    if failed.is_some() {
        // A resume may have re-admitted it.
        inner.queues.remove(&job.id);
    }
    inner.release(&job.id);

    let Some(failed) = failed else {
        warn!(job_id = %job.id, reason = %reason, "failure not recorded, job already finished");
        return;
    };

    error!(
        job_id = %failed.id,
        tenant_id = %failed.tenant_id,
        error_count = failed.error_count,
        error = %reason,
        "job failed"
    );
    if failed.error_count > failed.config.retry.max_retries {
        inner.queues.dead_letter(failed.priority, &failed.id);
        inner.emit(&failed, JobEventKind::DeadLettered);
    }
    inner.settle(&failed, JobEventKind::Failed { error: reason.clone() });
    inner
        .audit_job(
            &failed,
            "job.error",
            AuditSeverity::Error,
            json!({ "error": reason, "error_count": failed.error_count }),
        )
        .await;
}
