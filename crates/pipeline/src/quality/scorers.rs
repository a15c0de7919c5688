//! Built-in quality dimensions.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use ledgerflow_core::{IssueKind, QualityConfig, QualityIssue, Severity, SourceSchema};
use serde_json::{Map, Value};

use super::QualityScorer;
use crate::fields::{get_path, is_present};
use crate::transform::parse_timestamp;

/// Share of expected fields that are present and non-null.
///
/// Expected fields are the schema's, or the record's own keys when the
/// schema declares none.
pub fn completeness(record: &Map<String, Value>, schema: &SourceSchema, issues: &mut Vec<QualityIssue>) -> f64 {
    if schema.is_empty() {
        if record.is_empty() {
            issues.push(QualityIssue::new(None, IssueKind::Missing, Severity::High, "record is empty"));
            return 0.0;
        }
        let filled = record.values().filter(|v| !v.is_null()).count();
        return filled as f64 / record.len() as f64;
    }

    let mut filled = 0usize;
    for field in &schema.fields {
        if is_present(record, &field.name) {
            filled += 1;
        } else {
            let severity = if field.required { Severity::High } else { Severity::Low };
            issues.push(QualityIssue::new(
                Some(&field.name),
                IssueKind::Missing,
                severity,
                "field is missing or null",
            ));
        }
    }
    filled as f64 / schema.fields.len() as f64
}

/// Linear decay from 1.0 for a fresh record to 0.0 at `max_age_secs`.
///
/// 1.0 when no timestamp field is configured. A configured but missing or
/// unparsable timestamp scores 0.0.
pub fn timeliness(
    record: &Map<String, Value>,
    config: &QualityConfig,
    now: DateTime<Utc>,
    issues: &mut Vec<QualityIssue>,
) -> f64 {
    let Some(field) = &config.timestamp_field else {
        return 1.0;
    };
    let Some(raw) = get_path(record, field).filter(|v| !v.is_null()) else {
        issues.push(QualityIssue::new(Some(field), IssueKind::Missing, Severity::Medium, "timestamp missing"));
        return 0.0;
    };
    let Some(ts) = parse_timestamp(raw) else {
        issues.push(QualityIssue::new(
            Some(field),
            IssueKind::Invalid,
            Severity::Medium,
            format!("unparsable timestamp {raw}"),
        ));
        return 0.0;
    };

    let age_secs = (now - ts).num_milliseconds() as f64 / 1000.0;
    if age_secs <= 0.0 {
        return 1.0;
    }
    let max_age = config.max_age_secs.max(1) as f64;
    if age_secs >= max_age {
        issues.push(QualityIssue::new(
            Some(field),
            IssueKind::Late,
            Severity::Medium,
            format!("record is {:.0}s old, limit {}s", age_secs, config.max_age_secs),
        ));
        return 0.0;
    }
    1.0 - age_secs / max_age
}

/// Share of present, typed schema fields whose value matches the declared type.
#[derive(Debug, Default)]
pub struct TypeAccuracyScorer;

impl QualityScorer for TypeAccuracyScorer {
    fn name(&self) -> &str {
        "accuracy"
    }

    fn score(&mut self, record: &Map<String, Value>, schema: &SourceSchema, issues: &mut Vec<QualityIssue>) -> f64 {
        let mut checked = 0usize;
        let mut ok = 0usize;
        for field in &schema.fields {
            let Some(value) = get_path(record, &field.name).filter(|v| !v.is_null()) else {
                continue;
            };
            checked += 1;
            if field.data_type.matches(value) {
                ok += 1;
            } else {
                issues.push(QualityIssue::new(
                    Some(&field.name),
                    IssueKind::Invalid,
                    Severity::Medium,
                    format!("expected {:?}, found {value}", field.data_type).to_lowercase(),
                ));
            }
        }
        if checked == 0 {
            1.0
        } else {
            ok as f64 / checked as f64
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JsonKind {
    Bool,
    Number,
    String,
    Array,
    Object,
}

impl JsonKind {
    fn of(v: &Value) -> Option<Self> {
        match v {
            Value::Null => None,
            Value::Bool(_) => Some(JsonKind::Bool),
            Value::Number(_) => Some(JsonKind::Number),
            Value::String(_) => Some(JsonKind::String),
            Value::Array(_) => Some(JsonKind::Array),
            Value::Object(_) => Some(JsonKind::Object),
        }
    }
}

/// Share of top-level fields whose JSON type agrees with the first type
/// seen for that field earlier in the same job.
#[derive(Debug, Default)]
pub struct TypeConsistencyScorer {
    seen: HashMap<String, JsonKind>,
}

impl QualityScorer for TypeConsistencyScorer {
    fn name(&self) -> &str {
        "consistency"
    }

    fn score(&mut self, record: &Map<String, Value>, _schema: &SourceSchema, issues: &mut Vec<QualityIssue>) -> f64 {
        let mut checked = 0usize;
        let mut ok = 0usize;
        for (field, value) in record {
            let Some(kind) = JsonKind::of(value) else {
                continue;
            };
            checked += 1;
            match self.seen.get(field) {
                Some(first) if *first != kind => issues.push(QualityIssue::new(
                    Some(field),
                    IssueKind::Inconsistent,
                    Severity::Low,
                    format!("type changed from {first:?} to {kind:?}").to_lowercase(),
                )),
                Some(_) => ok += 1,
                None => {
                    self.seen.insert(field.clone(), kind);
                    ok += 1;
                }
            }
        }
        if checked == 0 {
            1.0
        } else {
            ok as f64 / checked as f64
        }
    }
}
