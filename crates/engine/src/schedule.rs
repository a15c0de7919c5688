//! Next-run computation for scheduled jobs and the trigger collaborator.
//!
//! The engine never fires scheduled jobs itself: it computes `next_run`,
//! tells the injected [`ScheduleTrigger`], and waits for `queue_job`.

use std::str::FromStr;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use ledgerflow_core::{ScheduleConfig, ScheduleKind};
use tracing::info;

/// External scheduler that later calls `queue_job` for the job.
#[async_trait]
pub trait ScheduleTrigger: Send + Sync {
    async fn schedule(&self, job_id: &str, next_run: DateTime<Utc>);
}

/// Default trigger: logs the next run and leaves firing to the operator.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTrigger;

#[async_trait]
impl ScheduleTrigger for LogTrigger {
    async fn schedule(&self, job_id: &str, next_run: DateTime<Utc>) {
        info!(job_id = %job_id, next_run = %next_run, "scheduled job awaiting trigger");
    }
}

/// Trigger that only remembers what it was asked to schedule.
#[derive(Debug, Default)]
pub struct RecordingTrigger {
    scheduled: Mutex<Vec<(String, DateTime<Utc>)>>,
}

impl RecordingTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scheduled(&self) -> Vec<(String, DateTime<Utc>)> {
        self.scheduled.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl ScheduleTrigger for RecordingTrigger {
    async fn schedule(&self, job_id: &str, next_run: DateTime<Utc>) {
        self.scheduled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((job_id.to_string(), next_run));
    }
}

/// When `config` next fires after `now`. `Ok(None)` for event schedules.
pub fn next_run(config: &ScheduleConfig, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, String> {
    match config.kind {
        ScheduleKind::Event => Ok(None),
        ScheduleKind::Interval => parse_interval(&config.expression).map(|d| Some(now + d)),
        ScheduleKind::Cron => {
            let tz = Tz::from_str(config.timezone.trim())
                .map_err(|e| format!("unknown timezone '{}': {e}", config.timezone))?;
            let schedule =
                parse_cron(&config.expression).map_err(|e| format!("invalid cron '{}': {e}", config.expression))?;
            Ok(schedule
                .after(&now.with_timezone(&tz))
                .next()
                .map(|t| t.with_timezone(&Utc)))
        }
    }
}

/// Parse a cron expression, auto-prepending "0 " for 5-field expressions.
///
/// The `cron` crate requires a seconds field; operators usually write the
/// classic 5-field form.
fn parse_cron(expr: &str) -> Result<Schedule, cron::error::Error> {
    let parts: Vec<&str> = expr.split_whitespace().collect();
    if parts.len() == 5 {
        Schedule::from_str(&format!("0 {expr}"))
    } else {
        Schedule::from_str(expr)
    }
}

/// Parse `30s`, `5m`, `1h30m`, `2d`, ... into a positive duration.
pub fn parse_interval(expr: &str) -> Result<Duration, String> {
    let expr = expr.trim();
    if expr.is_empty() {
        return Err("empty interval".into());
    }
    let mut total = Duration::zero();
    let mut digits = String::new();
    for c in expr.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let n: i64 = digits
            .parse()
            .map_err(|_| format!("invalid interval '{expr}': missing number before '{c}'"))?;
        digits.clear();
        total += match c {
            's' => Duration::seconds(n),
            'm' => Duration::minutes(n),
            'h' => Duration::hours(n),
            'd' => Duration::days(n),
            'w' => Duration::weeks(n),
            other => return Err(format!("invalid interval '{expr}': unknown unit '{other}'")),
        };
    }
    if !digits.is_empty() {
        return Err(format!("invalid interval '{expr}': missing unit"));
    }
    if total <= Duration::zero() {
        return Err(format!("invalid interval '{expr}': must be positive"));
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};

    fn cfg(kind: ScheduleKind, expression: &str, timezone: &str) -> ScheduleConfig {
        ScheduleConfig {
            kind,
            expression: expression.into(),
            timezone: timezone.into(),
        }
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, h, m, 0).unwrap()
    }

    #[test]
    fn intervals() {
        assert_eq!(parse_interval("30s").unwrap(), Duration::seconds(30));
        assert_eq!(parse_interval("1h30m").unwrap(), Duration::minutes(90));
        assert_eq!(parse_interval("1d").unwrap(), Duration::days(1));
        assert!(parse_interval("").is_err());
        assert!(parse_interval("5").is_err());
        assert!(parse_interval("m").is_err());
        assert!(parse_interval("3x").is_err());
        assert!(parse_interval("0s").is_err());
    }

    #[test]
    fn interval_next_run() {
        let next = next_run(&cfg(ScheduleKind::Interval, "5m", "UTC"), at(10, 0)).unwrap();
        assert_eq!(next, Some(at(10, 5)));
    }

    #[test]
    fn five_field_cron_in_utc() {
        let next = next_run(&cfg(ScheduleKind::Cron, "0 * * * *", "UTC"), at(10, 15)).unwrap();
        assert_eq!(next, Some(at(11, 0)));
    }

    #[test]
    fn cron_honours_timezone() {
        // 02:00 in Oslo during summer time is 00:00 UTC
        let next = next_run(&cfg(ScheduleKind::Cron, "0 0 2 * * *", "Europe/Oslo"), at(12, 0))
            .unwrap()
            .unwrap();
        assert_eq!(next.hour(), 0);
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 6, 2, 0, 0, 0).unwrap());
    }

    #[test]
    fn event_schedules_have_no_next_run() {
        assert_eq!(next_run(&cfg(ScheduleKind::Event, "orders.closed", "UTC"), at(0, 0)).unwrap(), None);
    }

    #[test]
    fn bad_expressions_are_rejected() {
        assert!(next_run(&cfg(ScheduleKind::Cron, "not a cron", "UTC"), at(0, 0)).is_err());
        assert!(next_run(&cfg(ScheduleKind::Cron, "0 * * * *", "Mars/Olympus"), at(0, 0)).is_err());
    }
}
