//! Audit collaborator and an in-memory reference implementation.
//!
//! The engine reports source registration and every job control operation
//! to an [`AuditLogger`]. Logger failures are surfaced as warnings and never
//! abort the operation being audited.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::AuditError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuditSeverity {
    Info,
    Warning,
    Error,
}

impl AuditSeverity {
    /// Numeric severity for comparison (higher = more severe).
    pub fn as_severity(&self) -> u8 {
        match self {
            AuditSeverity::Info => 0,
            AuditSeverity::Warning => 1,
            AuditSeverity::Error => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditCategory {
    DataSource,
    IngestionJob,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEntry {
    pub tenant_id: String,
    pub user_id: String,
    /// e.g. `job.create`, `job.pause`, `source.register`.
    pub action: String,
    pub details: serde_json::Value,
    pub category: AuditCategory,
    pub severity: AuditSeverity,
    pub timestamp: DateTime<Utc>,
}

#[async_trait]
pub trait AuditLogger: Send + Sync {
    async fn log_operation(&self, entry: AuditEntry) -> Result<(), AuditError>;
}

/// Log `entry`, downgrading a logger failure to a warning.
pub(crate) async fn record(logger: &Arc<dyn AuditLogger>, entry: AuditEntry) {
    let action = entry.action.clone();
    let tenant_id = entry.tenant_id.clone();
    if let Err(e) = logger.log_operation(entry).await {
        warn!(tenant_id = %tenant_id, action = %action, error = %e, "audit log write failed");
    }
}

/// Filters for [`InMemoryAuditLog::query`].
#[derive(Debug, Default, Deserialize)]
pub struct AuditQuery {
    /// Minimum severity (inclusive).
    pub severity: Option<AuditSeverity>,
    pub category: Option<AuditCategory>,
    /// Maximum number of entries to return.
    pub limit: Option<u32>,
    /// Only entries at or after this instant.
    pub since: Option<DateTime<Utc>>,
}

/// Per-tenant audit trail with FIFO eviction.
#[derive(Debug)]
pub struct InMemoryAuditLog {
    entries: RwLock<HashMap<String, VecDeque<AuditEntry>>>,
    max_entries_per_tenant: usize,
}

impl InMemoryAuditLog {
    /// Cap of 1 000 entries per tenant.
    pub fn new() -> Self {
        Self::with_max_entries(1_000)
    }

    pub fn with_max_entries(max: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_entries_per_tenant: max.max(1),
        }
    }

    /// Entries for `tenant_id`, newest first.
    pub fn query(&self, tenant_id: &str, params: &AuditQuery) -> Vec<AuditEntry> {
        let Ok(guard) = self.entries.read() else {
            return Vec::new();
        };
        let Some(deque) = guard.get(tenant_id) else {
            return Vec::new();
        };
        let min_severity = params.severity.map(|s| s.as_severity()).unwrap_or(0);
        let limit = params.limit.unwrap_or(100) as usize;

        deque
            .iter()
            .rev()
            .filter(|e| e.severity.as_severity() >= min_severity)
            .filter(|e| params.category.map_or(true, |c| e.category == c))
            .filter(|e| params.since.map_or(true, |s| e.timestamp >= s))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Every action logged for `tenant_id`, oldest first.
    pub fn actions(&self, tenant_id: &str) -> Vec<String> {
        self.entries
            .read()
            .map(|guard| {
                guard
                    .get(tenant_id)
                    .map(|d| d.iter().map(|e| e.action.clone()).collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    pub fn clear(&self, tenant_id: &str) {
        if let Ok(mut guard) = self.entries.write() {
            guard.remove(tenant_id);
        }
    }
}

impl Default for InMemoryAuditLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuditLogger for InMemoryAuditLog {
    async fn log_operation(&self, entry: AuditEntry) -> Result<(), AuditError> {
        let mut guard = self
            .entries
            .write()
            .map_err(|e| AuditError::Unavailable(e.to_string()))?;
        let deque = guard.entry(entry.tenant_id.clone()).or_default();
        deque.push_back(entry);
        while deque.len() > self.max_entries_per_tenant {
            deque.pop_front();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(tenant: &str, action: &str, severity: AuditSeverity) -> AuditEntry {
        AuditEntry {
            tenant_id: tenant.into(),
            user_id: "u1".into(),
            action: action.into(),
            details: json!({}),
            category: AuditCategory::IngestionJob,
            severity,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn entries_are_per_tenant_and_capped() {
        let log = InMemoryAuditLog::with_max_entries(2);
        for action in ["a", "b", "c"] {
            log.log_operation(entry("t1", action, AuditSeverity::Info)).await.unwrap();
        }
        log.log_operation(entry("t2", "x", AuditSeverity::Info)).await.unwrap();
        assert_eq!(log.actions("t1"), vec!["b", "c"]);
        assert_eq!(log.actions("t2"), vec!["x"]);
    }

    #[tokio::test]
    async fn query_filters_newest_first() {
        let log = InMemoryAuditLog::new();
        log.log_operation(entry("t1", "job.create", AuditSeverity::Info)).await.unwrap();
        log.log_operation(entry("t1", "job.error", AuditSeverity::Error)).await.unwrap();
        log.log_operation(entry("t1", "job.retry", AuditSeverity::Info)).await.unwrap();

        let all = log.query("t1", &AuditQuery::default());
        assert_eq!(all[0].action, "job.retry");

        let errors = log.query(
            "t1",
            &AuditQuery {
                severity: Some(AuditSeverity::Warning),
                ..Default::default()
            },
        );
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].action, "job.error");

        let limited = log.query(
            "t1",
            &AuditQuery {
                limit: Some(1),
                ..Default::default()
            },
        );
        assert_eq!(limited.len(), 1);
        log.clear("t1");
        assert!(log.query("t1", &AuditQuery::default()).is_empty());
    }
}
