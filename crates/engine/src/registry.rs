//! Source registry: validated, tenant-owned data source definitions.

use std::collections::HashSet;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use ledgerflow_core::DataSource;
use tracing::debug;

use crate::error::EngineError;

/// Registered sources in registration order.
#[derive(Debug, Default)]
pub struct SourceRegistry {
    sources: RwLock<IndexMap<String, DataSource>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, IndexMap<String, DataSource>> {
        self.sources.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, IndexMap<String, DataSource>> {
        self.sources.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Validate and store `source`. Ids are unique across tenants.
    pub fn register(&self, source: DataSource) -> Result<DataSource, EngineError> {
        validate(&source)?;
        let mut sources = self.write();
        if sources.contains_key(&source.id) {
            return Err(EngineError::DuplicateSource(source.id));
        }
        debug!(source_id = %source.id, tenant_id = %source.tenant_id, "source registered");
        sources.insert(source.id.clone(), source.clone());
        Ok(source)
    }

    pub fn get(&self, source_id: &str) -> Result<DataSource, EngineError> {
        self.read()
            .get(source_id)
            .cloned()
            .ok_or_else(|| EngineError::SourceNotFound(source_id.to_string()))
    }

    /// All sources, or only those owned by `tenant_id`.
    pub fn list(&self, tenant_id: Option<&str>) -> Vec<DataSource> {
        self.read()
            .values()
            .filter(|s| tenant_id.map_or(true, |t| s.tenant_id == t))
            .cloned()
            .collect()
    }

    pub fn set_active(&self, source_id: &str, active: bool) -> Result<(), EngineError> {
        let mut sources = self.write();
        let source = sources
            .get_mut(source_id)
            .ok_or_else(|| EngineError::SourceNotFound(source_id.to_string()))?;
        source.is_active = active;
        Ok(())
    }

    pub fn touch_ingested(&self, source_id: &str, at: DateTime<Utc>) {
        if let Some(source) = self.write().get_mut(source_id) {
            source.last_ingested = Some(at);
        }
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

fn validate(source: &DataSource) -> Result<(), EngineError> {
    let invalid = |msg: String| Err(EngineError::InvalidSource(msg));

    if source.id.trim().is_empty() {
        return invalid("id must not be empty".into());
    }
    if source.name.trim().is_empty() {
        return invalid(format!("source {}: name must not be empty", source.id));
    }
    if source.tenant_id.trim().is_empty() {
        return invalid(format!("source {}: tenant_id must not be empty", source.id));
    }
    if source.source_type != source.connection.source_type() {
        return invalid(format!(
            "source {}: type '{}' does not match '{}' connection",
            source.id,
            source.source_type,
            source.connection.source_type()
        ));
    }
    if source.schema.is_empty() {
        return invalid(format!("source {}: schema must declare at least one field", source.id));
    }

    let mut seen = HashSet::new();
    for field in &source.schema.fields {
        if field.name.trim().is_empty() {
            return invalid(format!("source {}: schema field with empty name", source.id));
        }
        if !seen.insert(field.name.as_str()) {
            return invalid(format!("source {}: duplicate schema field '{}'", source.id, field.name));
        }
    }
    for key in &source.schema.primary_key {
        if !seen.contains(key.as_str()) {
            return invalid(format!("source {}: primary key '{key}' is not a schema field", source.id));
        }
    }
    if let Some(tenant_field) = &source.schema.tenant_field {
        if !seen.contains(tenant_field.as_str()) {
            return invalid(format!(
                "source {}: tenant field '{tenant_field}' is not a schema field",
                source.id
            ));
        }
    }

    if source.encryption.enabled
        && source.encryption.key_id.as_deref().map_or(true, |k| k.trim().is_empty())
    {
        return Err(EngineError::EncryptionConfigInvalid(format!(
            "source {}: encryption enabled without a key_id",
            source.id
        )));
    }
    Ok(())
}
