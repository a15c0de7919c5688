//! Data source definitions: connector kind, connection config (tagged union),
//! and the record schema handed to jobs.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Source type ──────────────────────────────────────────────────────

/// Connector family a source belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Database,
    EventStream,
    File,
    Api,
    AuditLog,
}

impl SourceType {
    pub const ALL: [SourceType; 5] = [
        SourceType::Database,
        SourceType::EventStream,
        SourceType::File,
        SourceType::Api,
        SourceType::AuditLog,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Database => "database",
            SourceType::EventStream => "event_stream",
            SourceType::File => "file",
            SourceType::Api => "api",
            SourceType::AuditLog => "audit_log",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Connection configuration (tagged union) ──────────────────────────

/// Connector-specific configuration, tagged by `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConnectionConfig {
    Database(DatabaseConnection),
    EventStream(EventStreamConnection),
    File(FileConnection),
    Api(ApiConnection),
    AuditLog(AuditLogConnection),
}

impl ConnectionConfig {
    /// The connector family this configuration targets.
    pub fn source_type(&self) -> SourceType {
        match self {
            ConnectionConfig::Database(_) => SourceType::Database,
            ConnectionConfig::EventStream(_) => SourceType::EventStream,
            ConnectionConfig::File(_) => SourceType::File,
            ConnectionConfig::Api(_) => SourceType::Api,
            ConnectionConfig::AuditLog(_) => SourceType::AuditLog,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConnection {
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    pub database: String,
    /// Table or query the connector reads from.
    pub query: String,
    /// Reference to stored credentials, never the secret itself.
    #[serde(default)]
    pub credentials_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventStreamConnection {
    pub brokers: Vec<String>,
    pub topic: String,
    #[serde(default)]
    pub consumer_group: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileConnection {
    pub path: String,
    #[serde(default = "default_file_format")]
    pub format: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiConnection {
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub credentials_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogConnection {
    pub stream: String,
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
}

fn default_file_format() -> String {
    "jsonl".to_string()
}

// ── Schema ───────────────────────────────────────────────────────────

/// Declared JSON type of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Number,
    Integer,
    Boolean,
    Date,
    Object,
    Array,
    #[default]
    Any,
}

impl FieldType {
    /// Whether a JSON value conforms to this declared type.
    pub fn matches(&self, value: &serde_json::Value) -> bool {
        use serde_json::Value;
        match self {
            FieldType::Any => true,
            FieldType::String => value.is_string(),
            FieldType::Number => value.is_number(),
            FieldType::Integer => value.is_i64() || value.is_u64(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Object => value.is_object(),
            FieldType::Array => value.is_array(),
            FieldType::Date => match value {
                Value::String(s) => DateTime::parse_from_rfc3339(s).is_ok()
                    || chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok(),
                Value::Number(n) => n.is_i64() || n.is_u64(),
                _ => false,
            },
        }
    }
}

/// One field of a source schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(default)]
    pub data_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub pii: bool,
    #[serde(default)]
    pub encrypted: bool,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, data_type: FieldType) -> Self {
        Self {
            name: name.into(),
            data_type,
            required: false,
            pii: false,
            encrypted: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn pii(mut self) -> Self {
        self.pii = true;
        self
    }

    pub fn encrypted(mut self) -> Self {
        self.encrypted = true;
        self
    }
}

/// Record layout produced by a source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceSchema {
    pub fields: Vec<FieldDef>,
    #[serde(default)]
    pub primary_key: Vec<String>,
    /// Field carrying the owning tenant id inside each record.
    #[serde(default)]
    pub tenant_field: Option<String>,
}

impl SourceSchema {
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| f.required)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

// ── Encryption ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EncryptionConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Identifier of the key in the external key store.
    #[serde(default)]
    pub key_id: Option<String>,
}

// ── Data source ──────────────────────────────────────────────────────

/// A registered data source. Owned by the source registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSource {
    pub id: String,
    pub name: String,
    pub tenant_id: String,
    pub source_type: SourceType,
    pub connection: ConnectionConfig,
    pub schema: SourceSchema,
    #[serde(default)]
    pub encryption: EncryptionConfig,
    #[serde(default = "default_true")]
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_ingested: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}

impl DataSource {
    /// New active source with no encryption.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        tenant_id: impl Into<String>,
        connection: ConnectionConfig,
        schema: SourceSchema,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            tenant_id: tenant_id.into(),
            source_type: connection.source_type(),
            connection,
            schema,
            encryption: EncryptionConfig::default(),
            is_active: true,
            created_at: Utc::now(),
            last_ingested: None,
        }
    }
}
