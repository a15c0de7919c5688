use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ledgerflow_core::{IngestionJob, Priority};
use serde::Serialize;

/// Totals over every run that ended in one terminal status.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunTotals {
    pub runs: u64,
    pub records_processed: u64,
    /// Records that reached the ledger.
    pub records_stored: u64,
    /// Summed wall time between start and terminal transition.
    pub run_time: Duration,
    pub last_at: Option<DateTime<Utc>>,
}

impl RunTotals {
    pub fn mean_run_time(&self) -> Duration {
        u32::try_from(self.runs)
            .ok()
            .and_then(|runs| self.run_time.checked_div(runs))
            .unwrap_or_default()
    }

    pub fn records_per_run(&self) -> f64 {
        if self.runs == 0 {
            0.0
        } else {
            self.records_processed as f64 / self.runs as f64
        }
    }
}

/// Scheduler operational metrics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerMetrics {
    /// Ticks that ran (overlapping ticks are skipped, not counted).
    pub ticks: u64,
    pub jobs_started: u64,
    /// Finished runs by terminal status.
    pub runs: HashMap<String, RunTotals>,
    /// Run time spent per priority lane, across all outcomes.
    pub lane_run_time: HashMap<Priority, Duration>,
    /// Pending jobs per lane after the last reconcile.
    pub lane_occupancy: HashMap<Priority, usize>,
    pub jobs_purged: u64,
}

impl SchedulerMetrics {
    /// Fold a run that just reached a terminal status into the totals.
    pub fn record_run(&mut self, job: &IngestionJob, at: DateTime<Utc>) {
        let ran_for = job
            .started_at
            .zip(job.completed_at)
            .and_then(|(start, end)| (end - start).to_std().ok())
            .unwrap_or_default();

        let totals = self.runs.entry(job.status.as_str().to_string()).or_default();
        totals.runs += 1;
        totals.records_processed += job.progress.processed_records;
        totals.records_stored += job.progress.successful_records;
        totals.run_time += ran_for;
        totals.last_at = Some(at);

        *self.lane_run_time.entry(job.priority).or_default() += ran_for;
    }

    pub fn record_occupancy(&mut self, occupancy: [usize; 4]) {
        for priority in Priority::ALL {
            self.lane_occupancy.insert(priority, occupancy[priority.lane_index()]);
        }
    }

    pub fn finished(&self, outcome: &str) -> u64 {
        self.runs.get(outcome).map_or(0, |t| t.runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as Span;
    use ledgerflow_core::{JobConfig, JobStatus, JobType};

    fn finished_job(priority: Priority, status: JobStatus, secs: i64, processed: u64, stored: u64) -> IngestionJob {
        let start = Utc::now();
        let mut job = IngestionJob::new("s1", "t1", JobType::Batch, priority, JobConfig::default(), start);
        job.status = status;
        job.started_at = Some(start);
        job.completed_at = Some(start + Span::seconds(secs));
        job.progress.processed_records = processed;
        job.progress.successful_records = stored;
        job
    }

    #[test]
    fn completed_run_adds_records_and_time() {
        let mut m = SchedulerMetrics::default();
        m.record_run(&finished_job(Priority::High, JobStatus::Completed, 4, 10, 9), Utc::now());

        assert_eq!(m.finished("completed"), 1);
        let totals = &m.runs["completed"];
        assert_eq!(totals.records_stored, 9);
        assert_eq!(totals.mean_run_time(), Duration::from_secs(4));
        assert!(totals.last_at.is_some());
        assert_eq!(m.lane_run_time[&Priority::High], Duration::from_secs(4));
    }

    #[test]
    fn totals_split_by_outcome_and_lane() {
        let mut m = SchedulerMetrics::default();
        m.record_run(&finished_job(Priority::Low, JobStatus::Failed, 1, 2, 0), Utc::now());
        m.record_run(&finished_job(Priority::Low, JobStatus::Failed, 3, 6, 0), Utc::now());
        m.record_run(&finished_job(Priority::Critical, JobStatus::Completed, 5, 1, 1), Utc::now());

        let failed = &m.runs["failed"];
        assert_eq!(failed.runs, 2);
        assert_eq!(failed.mean_run_time(), Duration::from_secs(2));
        assert!((failed.records_per_run() - 4.0).abs() < 1e-9);
        assert_eq!(m.lane_run_time[&Priority::Low], Duration::from_secs(4));
        assert_eq!(m.lane_run_time[&Priority::Critical], Duration::from_secs(5));
    }

    #[test]
    fn never_started_run_counts_without_time() {
        let mut m = SchedulerMetrics::default();
        let mut job = finished_job(Priority::Medium, JobStatus::Cancelled, 0, 0, 0);
        job.started_at = None;
        m.record_run(&job, Utc::now());

        assert_eq!(m.finished("cancelled"), 1);
        assert_eq!(m.runs["cancelled"].run_time, Duration::ZERO);
        assert_eq!(m.runs["cancelled"].records_per_run(), 0.0);
    }

    #[test]
    fn occupancy_keyed_by_lane() {
        let mut m = SchedulerMetrics::default();
        m.record_occupancy([1, 0, 3, 0]);
        assert_eq!(m.lane_occupancy[&Priority::Medium], 3);
        assert_eq!(m.finished("completed"), 0);
    }
}
