use std::env;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::job::Priority;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

const ENV_PREFIX: &str = "LEDGERFLOW";

fn env_opt(key: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}_{key}"))
        .ok()
        .filter(|s| !s.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_opt(key).and_then(|v| v.parse().ok())
}

// ── Lane capacities ───────────────────────────────────────────

/// Capacity ceiling for each priority lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaneCapacities {
    #[serde(default = "default_critical_capacity")]
    pub critical: usize,
    #[serde(default = "default_high_capacity")]
    pub high: usize,
    #[serde(default = "default_medium_capacity")]
    pub medium: usize,
    #[serde(default = "default_low_capacity")]
    pub low: usize,
}

fn default_critical_capacity() -> usize { 10_000 }
fn default_high_capacity() -> usize { 50_000 }
fn default_medium_capacity() -> usize { 100_000 }
fn default_low_capacity() -> usize { 50_000 }

impl Default for LaneCapacities {
    fn default() -> Self {
        Self {
            critical: default_critical_capacity(),
            high: default_high_capacity(),
            medium: default_medium_capacity(),
            low: default_low_capacity(),
        }
    }
}

impl LaneCapacities {
    /// Capacity of the lane serving `priority`.
    pub fn for_priority(&self, priority: Priority) -> usize {
        match priority {
            Priority::Critical => self.critical,
            Priority::High => self.high,
            Priority::Medium => self.medium,
            Priority::Low => self.low,
        }
    }

    /// Same capacity for all four lanes (handy in tests).
    pub fn uniform(capacity: usize) -> Self {
        Self {
            critical: capacity,
            high: capacity,
            medium: capacity,
            low: capacity,
        }
    }
}

// ── Engine config ─────────────────────────────────────────────

/// Runtime configuration for the ingestion engine.
///
/// Resolution order: defaults, then an optional TOML file, then
/// `LEDGERFLOW_*` environment variables, then [`validate`](Self::validate).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Scheduler tick period in milliseconds.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// How long finished jobs stay in the job table.
    #[serde(default = "default_job_retention_secs")]
    pub job_retention_secs: u64,
    /// Bounded buffer between a connector stream and the pipeline.
    #[serde(default = "default_stream_buffer")]
    pub stream_buffer: usize,
    #[serde(default)]
    pub lanes: LaneCapacities,
    /// Field-name substrings that mark a field as PII.
    #[serde(default = "default_pii_patterns")]
    pub pii_patterns: Vec<String>,
    /// Retention applied to records when the job does not override it.
    #[serde(default = "default_retention_days")]
    pub default_retention_days: u32,
    /// Per-tenant cap of the in-memory audit log.
    #[serde(default = "default_audit_max_entries")]
    pub audit_max_entries: usize,
}

fn default_tick_interval_ms() -> u64 { 1_000 }
fn default_job_retention_secs() -> u64 { 86_400 }
fn default_stream_buffer() -> usize { 1_024 }
fn default_retention_days() -> u32 { 365 }
fn default_audit_max_entries() -> usize { 1_000 }

/// Default PII name patterns.
pub fn default_pii_patterns() -> Vec<String> {
    ["email", "name", "phone", "ssn", "credit_card", "address"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            job_retention_secs: default_job_retention_secs(),
            stream_buffer: default_stream_buffer(),
            lanes: LaneCapacities::default(),
            pii_patterns: default_pii_patterns(),
            default_retention_days: default_retention_days(),
            audit_max_entries: default_audit_max_entries(),
        }
    }
}

impl EngineConfig {
    /// Defaults plus environment overrides (call `load_dotenv()` first).
    pub fn from_env() -> Result<Self, CoreError> {
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse config from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, CoreError> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Apply environment variable overrides.
    ///
    /// Convention: `LEDGERFLOW_KEY` overrides `key`, lane capacities use
    /// `LEDGERFLOW_LANE_<PRIORITY>_CAPACITY`, and `LEDGERFLOW_PII_PATTERNS`
    /// is a comma-separated list.
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parse("TICK_INTERVAL_MS") {
            self.tick_interval_ms = v;
        }
        if let Some(v) = env_parse("JOB_RETENTION_SECS") {
            self.job_retention_secs = v;
        }
        if let Some(v) = env_parse("STREAM_BUFFER") {
            self.stream_buffer = v;
        }
        if let Some(v) = env_parse("LANE_CRITICAL_CAPACITY") {
            self.lanes.critical = v;
        }
        if let Some(v) = env_parse("LANE_HIGH_CAPACITY") {
            self.lanes.high = v;
        }
        if let Some(v) = env_parse("LANE_MEDIUM_CAPACITY") {
            self.lanes.medium = v;
        }
        if let Some(v) = env_parse("LANE_LOW_CAPACITY") {
            self.lanes.low = v;
        }
        if let Some(v) = env_opt("PII_PATTERNS") {
            self.pii_patterns = v
                .split(',')
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(v) = env_parse("DEFAULT_RETENTION_DAYS") {
            self.default_retention_days = v;
        }
        if let Some(v) = env_parse("AUDIT_MAX_ENTRIES") {
            self.audit_max_entries = v;
        }
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.tick_interval_ms == 0 {
            return Err(CoreError::Config("tick_interval_ms must be > 0".into()));
        }
        if self.stream_buffer == 0 {
            return Err(CoreError::Config("stream_buffer must be > 0".into()));
        }
        for priority in Priority::ALL {
            if self.lanes.for_priority(priority) == 0 {
                return Err(CoreError::Config(format!(
                    "lane '{}' capacity must be > 0",
                    priority.lane_id()
                )));
            }
        }
        if self.pii_patterns.is_empty() {
            return Err(CoreError::Config("pii_patterns must not be empty".into()));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.tick_interval_ms)
    }

    pub fn job_retention(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.job_retention_secs as i64)
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Engine config loaded:");
        tracing::info!("  scheduler:  tick={}ms, retention={}s", self.tick_interval_ms, self.job_retention_secs);
        tracing::info!(
            "  lanes:      critical={}, high={}, medium={}, low={}",
            self.lanes.critical, self.lanes.high, self.lanes.medium, self.lanes.low
        );
        tracing::info!("  pipeline:   stream_buffer={}, retention_days={}", self.stream_buffer, self.default_retention_days);
        tracing::info!("  pii:        {}", self.pii_patterns.join(","));
    }
}
