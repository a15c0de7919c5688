//! Enrichment stage: key lookups and joins against named side sources.
//!
//! Best-effort: an unavailable or failing side source never fails the
//! record, the target fields are simply left unset.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use ledgerflow_core::{EnrichmentConfig, JoinKind};
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::EnrichmentError;
use crate::fields::{get_path, key_string, set_path, values_equal};

/// Reference data consulted during enrichment.
#[async_trait]
pub trait SideSource: Send + Sync {
    /// Value stored under `key`, if any.
    async fn lookup(&self, key: &Value) -> Result<Option<Value>, EnrichmentError>;

    /// Rows whose fields equal every `(field, value)` pair.
    async fn find(&self, criteria: &[(String, Value)]) -> Result<Vec<Map<String, Value>>, EnrichmentError>;
}

/// In-memory side source: a key/value table plus a row set for joins.
#[derive(Debug, Clone, Default)]
pub struct StaticSideSource {
    entries: HashMap<String, Value>,
    rows: Vec<Map<String, Value>>,
}

impl StaticSideSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(mut self, key: impl Into<String>, value: Value) -> Self {
        self.entries.insert(key.into(), value);
        self
    }

    /// Add a join row. Non-object values are ignored.
    pub fn with_row(mut self, row: Value) -> Self {
        if let Value::Object(map) = row {
            self.rows.push(map);
        }
        self
    }
}

#[async_trait]
impl SideSource for StaticSideSource {
    async fn lookup(&self, key: &Value) -> Result<Option<Value>, EnrichmentError> {
        Ok(self.entries.get(&key_string(key)).cloned())
    }

    async fn find(&self, criteria: &[(String, Value)]) -> Result<Vec<Map<String, Value>>, EnrichmentError> {
        Ok(self
            .rows
            .iter()
            .filter(|row| {
                criteria
                    .iter()
                    .all(|(field, want)| get_path(row, field).is_some_and(|v| values_equal(v, want)))
            })
            .cloned()
            .collect())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Enriched {
    Kept(Map<String, Value>),
    /// Inner join found no match.
    Filtered { source: String },
}

pub struct Enricher {
    config: EnrichmentConfig,
    sources: HashMap<String, Arc<dyn SideSource>>,
}

impl Enricher {
    pub fn new(config: &EnrichmentConfig, sources: &HashMap<String, Arc<dyn SideSource>>) -> Self {
        Self {
            config: config.clone(),
            sources: sources.clone(),
        }
    }

    pub fn is_noop(&self) -> bool {
        self.config.lookups.is_empty() && self.config.joins.is_empty()
    }

    fn source(&self, name: &str) -> Result<&Arc<dyn SideSource>, EnrichmentError> {
        self.sources
            .get(name)
            .ok_or_else(|| EnrichmentError::NotRegistered(name.to_string()))
    }

    pub async fn apply(&self, mut record: Map<String, Value>) -> Enriched {
        for lookup in &self.config.lookups {
            let key = get_path(&record, &lookup.key_field).filter(|v| !v.is_null()).cloned();
            let found = match key {
                None => Ok(None),
                Some(key) => match self.source(&lookup.source) {
                    Ok(source) => source.lookup(&key).await,
                    Err(e) => Err(e),
                },
            };
            match found {
                Ok(Some(value)) => set_path(&mut record, &lookup.target_field, value),
                Ok(None) => {
                    if let Some(default) = &lookup.default {
                        set_path(&mut record, &lookup.target_field, default.clone());
                    }
                }
                Err(e) => warn!(
                    source = %lookup.source,
                    field = %lookup.target_field,
                    error = %e,
                    "lookup skipped"
                ),
            }
        }

        for join in &self.config.joins {
            let criteria: Option<Vec<(String, Value)>> = join
                .on
                .iter()
                .map(|on| {
                    get_path(&record, &on.left)
                        .filter(|v| !v.is_null())
                        .map(|v| (on.right.clone(), v.clone()))
                })
                .collect();

            let rows = match criteria {
                None => Ok(Vec::new()),
                Some(criteria) => match self.source(&join.source) {
                    Ok(source) => source.find(&criteria).await,
                    Err(e) => Err(e),
                },
            };

            match rows {
                Ok(rows) => match rows.into_iter().next() {
                    Some(row) => {
                        let prefix = join.prefix.as_deref().unwrap_or("");
                        for (field, value) in row {
                            let wanted = join.fields.as_ref().map_or(true, |f| f.contains(&field));
                            if wanted {
                                record.insert(format!("{prefix}{field}"), value);
                            }
                        }
                    }
                    None if join.kind == JoinKind::Inner => {
                        return Enriched::Filtered {
                            source: join.source.clone(),
                        };
                    }
                    // Left, right and full joins keep the unmatched record.
                    None => {}
                },
                Err(e) => warn!(source = %join.source, error = %e, "join skipped"),
            }
        }

        Enriched::Kept(record)
    }
}
