//! PII field detection.

use ledgerflow_core::SourceSchema;
use serde_json::{Map, Value};

use crate::fields::is_present;

/// Flags schema-declared PII fields and any field whose name contains a
/// configured pattern (case-insensitive substring).
#[derive(Debug, Clone)]
pub struct PiiDetector {
    patterns: Vec<String>,
}

impl PiiDetector {
    pub fn new(patterns: &[String]) -> Self {
        Self {
            patterns: patterns.iter().map(|p| p.to_lowercase()).filter(|p| !p.is_empty()).collect(),
        }
    }

    /// Sorted, de-duplicated dotted paths of PII fields present in `record`.
    pub fn detect(&self, record: &Map<String, Value>, schema: &SourceSchema) -> Vec<String> {
        let mut found: Vec<String> = schema
            .fields
            .iter()
            .filter(|f| f.pii && is_present(record, &f.name))
            .map(|f| f.name.clone())
            .collect();
        self.walk(record, "", &mut found);
        found.sort();
        found.dedup();
        found
    }

    fn walk(&self, map: &Map<String, Value>, prefix: &str, found: &mut Vec<String>) {
        for (key, value) in map {
            let path = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{prefix}.{key}")
            };
            let lower = key.to_lowercase();
            if !value.is_null() && self.patterns.iter().any(|p| lower.contains(p.as_str())) {
                found.push(path.clone());
            }
            if let Value::Object(inner) = value {
                self.walk(inner, &path, found);
            }
        }
    }
}
