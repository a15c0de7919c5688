//! Per-record quality scores and issues.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    Missing,
    Invalid,
    Inconsistent,
    Late,
    Duplicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityIssue {
    pub field: Option<String>,
    pub kind: IssueKind,
    pub severity: Severity,
    pub message: String,
}

impl QualityIssue {
    pub fn new(
        field: Option<&str>,
        kind: IssueKind,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            field: field.map(str::to_string),
            kind,
            severity,
            message: message.into(),
        }
    }
}

/// Quality scores in `[0, 1]`, computed once per record and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub completeness: f64,
    pub accuracy: f64,
    pub consistency: f64,
    pub timeliness: f64,
    pub score: f64,
    pub issues: Vec<QualityIssue>,
}

impl QualityMetrics {
    /// Metrics for a record that was not scored.
    pub fn perfect() -> Self {
        Self {
            completeness: 1.0,
            accuracy: 1.0,
            consistency: 1.0,
            timeliness: 1.0,
            score: 1.0,
            issues: Vec::new(),
        }
    }

    pub fn worst_severity(&self) -> Option<Severity> {
        self.issues.iter().map(|i| i.severity).max()
    }
}
