//! Ingestion job model: priority, lifecycle status, configuration, progress.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::stages::{DedupConfig, EnrichmentConfig, QualityConfig, TransformConfig, ValidationConfig};

// ── Priority ─────────────────────────────────────────────────────────

/// Job priority. Each priority owns exactly one queue lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical = 0,
    High = 1,
    Medium = 2,
    Low = 3,
}

impl Priority {
    /// Lanes in strict scheduling order.
    pub const ALL: [Priority; 4] = [Priority::Critical, Priority::High, Priority::Medium, Priority::Low];

    /// Zero-based lane index (CRITICAL → 0 … LOW → 3).
    pub fn lane_index(&self) -> usize {
        *self as usize
    }

    pub fn lane_id(&self) -> &'static str {
        match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }

    pub fn from_lane_id(id: &str) -> Option<Self> {
        match id.to_ascii_lowercase().as_str() {
            "critical" => Some(Priority::Critical),
            "high" => Some(Priority::High),
            "medium" => Some(Priority::Medium),
            "low" => Some(Priority::Low),
            _ => None,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.lane_id())
    }
}

// ── Job kind / status ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    RealTime,
    Batch,
    /// Admitted only when the external scheduler calls `queue_job`.
    Scheduled,
}

/// Current status of an ingestion job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Paused => "paused",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Running, Paused)
                | (Paused, Pending)
                | (Paused, Cancelled)
                // resubmission of a finished run
                | (Failed, Pending)
                | (Completed, Pending)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Config ───────────────────────────────────────────────────────────

/// Retry intent. The engine never retries on its own; `retry_job` honours
/// `max_retries` and jobs beyond it land in the dead-letter lane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_retries() -> u32 { 3 }
fn default_retry_delay_ms() -> u64 { 1_000 }
fn default_backoff_multiplier() -> f64 { 2.0 }

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryPolicy {
    /// Suggested delay before resubmitting after `attempt` failures.
    pub fn delay_for(&self, attempt: u32) -> std::time::Duration {
        let factor = self.backoff_multiplier.max(1.0).powi(attempt.saturating_sub(1) as i32);
        std::time::Duration::from_millis((self.retry_delay_ms as f64 * factor) as u64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleKind {
    Interval,
    Cron,
    Event,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub kind: ScheduleKind,
    /// `"5m"` for intervals, a 5/6-field cron line, or an event name.
    pub expression: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub transform: TransformConfig,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub quality: QualityConfig,
    #[serde(default)]
    pub schedule: Option<ScheduleConfig>,
    #[serde(default)]
    pub legal_hold: bool,
    #[serde(default)]
    pub retention_days: Option<u32>,
}

fn default_batch_size() -> usize { 100 }

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            retry: RetryPolicy::default(),
            validation: ValidationConfig::default(),
            transform: TransformConfig::default(),
            enrichment: EnrichmentConfig::default(),
            dedup: DedupConfig::default(),
            quality: QualityConfig::default(),
            schedule: None,
            legal_hold: false,
            retention_days: None,
        }
    }
}

// ── Progress / metrics ───────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    /// Known total when the connector reports one, otherwise the running count.
    pub total_records: u64,
    pub processed_records: u64,
    pub successful_records: u64,
    pub failed_records: u64,
    pub quarantined_records: u64,
    /// Dropped by transform filters or inner joins.
    pub filtered_records: u64,
    pub duplicate_records: u64,
    pub percentage: f64,
}

impl JobProgress {
    pub fn recompute_percentage(&mut self) {
        self.percentage = if self.total_records == 0 {
            0.0
        } else {
            (self.processed_records as f64 / self.total_records as f64 * 100.0).min(100.0)
        };
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobMetrics {
    /// Records per second since the job started.
    pub throughput: f64,
    pub avg_latency_ms: f64,
    /// Failed / processed.
    pub error_rate: f64,
    /// Mean aggregate quality of accepted records.
    pub quality_score: f64,
}

// ── Job ──────────────────────────────────────────────────────────────

/// An ingestion job. Mutated only by the scheduler and the control API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionJob {
    pub id: String,
    pub source_id: String,
    pub tenant_id: String,
    pub job_type: JobType,
    pub priority: Priority,
    pub config: JobConfig,
    pub progress: JobProgress,
    pub metrics: JobMetrics,
    pub status: JobStatus,
    pub error_count: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    /// Number of times this job has been (re)submitted to a lane.
    pub attempt: u32,
    /// Who asked for the job, forwarded to the audit log.
    pub created_by: Option<String>,
}

impl IngestionJob {
    pub fn new(
        source_id: impl Into<String>,
        tenant_id: impl Into<String>,
        job_type: JobType,
        priority: Priority,
        config: JobConfig,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source_id: source_id.into(),
            tenant_id: tenant_id.into(),
            job_type,
            priority,
            config,
            progress: JobProgress::default(),
            metrics: JobMetrics::default(),
            status: JobStatus::Pending,
            error_count: 0,
            last_error: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            next_run: None,
            attempt: 0,
            created_by: None,
        }
    }

    /// Clear per-run counters before a resubmission.
    pub fn reset_run(&mut self) {
        self.progress = JobProgress::default();
        self.metrics = JobMetrics::default();
        self.started_at = None;
        self.completed_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_lane_order() {
        let idx: Vec<usize> = Priority::ALL.iter().map(|p| p.lane_index()).collect();
        assert_eq!(idx, vec![0, 1, 2, 3]);
        assert!(Priority::Critical < Priority::Low);
        assert_eq!(Priority::from_lane_id("HIGH"), Some(Priority::High));
        assert_eq!(Priority::from_lane_id("urgent"), None);
    }

    #[test]
    fn test_job_status_serde() {
        for (variant, expected) in [
            (JobStatus::Pending, "pending"),
            (JobStatus::Running, "running"),
            (JobStatus::Paused, "paused"),
            (JobStatus::Completed, "completed"),
            (JobStatus::Failed, "failed"),
            (JobStatus::Cancelled, "cancelled"),
        ] {
            let json = serde_json::to_string(&variant).unwrap();
            assert_eq!(json, format!("\"{}\"", expected));
        }
    }

    #[test]
    fn lifecycle_transitions() {
        use JobStatus::*;
        assert!(Pending.can_transition_to(Running));
        assert!(Running.can_transition_to(Paused));
        assert!(Paused.can_transition_to(Pending));
        assert!(!Paused.can_transition_to(Running));
        assert!(!Completed.can_transition_to(Running));
        assert!(!Cancelled.can_transition_to(Pending));
        assert!(!Pending.can_transition_to(Paused));
    }

    #[test]
    fn retry_delay_backs_off() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1).as_millis(), 1_000);
        assert_eq!(policy.delay_for(2).as_millis(), 2_000);
        assert_eq!(policy.delay_for(3).as_millis(), 4_000);
    }

    #[test]
    fn progress_percentage() {
        let mut p = JobProgress {
            total_records: 4,
            processed_records: 1,
            ..Default::default()
        };
        p.recompute_percentage();
        assert!((p.percentage - 25.0).abs() < f64::EPSILON);

        p.total_records = 0;
        p.recompute_percentage();
        assert_eq!(p.percentage, 0.0);
    }

    #[test]
    fn job_config_defaults_from_empty_json() {
        let cfg: JobConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.batch_size, 100);
        assert_eq!(cfg.retry.max_retries, 3);
        assert!(cfg.schedule.is_none());
    }
}
