//! Per-stage pipeline configuration carried inside a [`JobConfig`](crate::JobConfig).
//!
//! These are plain data; the behaviour lives in `ledgerflow-pipeline`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Validation ───────────────────────────────────────────────────────

/// What to do with a record that fails validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ErrorHandling {
    /// Record fails; the job fails too when `strict_mode` is set.
    #[default]
    Fail,
    /// Record is dropped and counted as failed.
    Skip,
    /// Record is set aside in the job's quarantine list.
    Quarantine,
}

/// Check applied to a single field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleKind {
    Required,
    Regex { pattern: String },
    Range {
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
    },
    Enum { values: Vec<Value> },
    /// Resolved by name against the custom rules registered with the pipeline.
    Custom { name: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRule {
    pub field: String,
    #[serde(flatten)]
    pub kind: RuleKind,
    #[serde(default)]
    pub message: Option<String>,
}

impl ValidationRule {
    pub fn new(field: impl Into<String>, kind: RuleKind) -> Self {
        Self {
            field: field.into(),
            kind,
            message: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub strict_mode: bool,
    #[serde(default)]
    pub rules: Vec<ValidationRule>,
    #[serde(default)]
    pub error_handling: ErrorHandling,
    /// Fraction of processed records allowed into quarantine before the job fails.
    #[serde(default = "default_quarantine_threshold")]
    pub quarantine_threshold: f64,
}

fn default_true() -> bool {
    true
}

fn default_quarantine_threshold() -> f64 {
    0.1
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            strict_mode: true,
            rules: Vec::new(),
            error_handling: ErrorHandling::Fail,
            quarantine_threshold: default_quarantine_threshold(),
        }
    }
}

// ── Transform ────────────────────────────────────────────────────────

/// Named value coercion applied by a field mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformFn {
    Uppercase,
    Lowercase,
    Trim,
    Number,
    Integer,
    Boolean,
    String,
    /// Normalise to an RFC 3339 UTC timestamp.
    Date,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub transform: Option<TransformFn>,
    #[serde(default)]
    pub default: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    NotContains,
    Exists,
}

/// Records whose field does not satisfy the filter are dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterRule {
    pub field: String,
    pub op: FilterOp,
    #[serde(default)]
    pub value: Value,
}

/// Expression tree for calculated fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "args", rename_all = "snake_case")]
pub enum Expression {
    Field(String),
    Literal(Value),
    Add(Vec<Expression>),
    Subtract(Box<Expression>, Box<Expression>),
    Multiply(Vec<Expression>),
    Divide(Box<Expression>, Box<Expression>),
    Concat(Vec<Expression>),
    /// First non-null argument.
    Coalesce(Vec<Expression>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculatedField {
    pub name: String,
    pub expression: Expression,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransformConfig {
    #[serde(default)]
    pub mappings: Vec<FieldMapping>,
    #[serde(default)]
    pub filters: Vec<FilterRule>,
    #[serde(default)]
    pub calculated_fields: Vec<CalculatedField>,
}

// ── Enrichment ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookupConfig {
    /// Record field whose value is the lookup key.
    pub key_field: String,
    /// Named side source.
    pub source: String,
    pub target_field: String,
    #[serde(default)]
    pub default: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinKind {
    Left,
    Right,
    Inner,
    Full,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinOn {
    pub left: String,
    pub right: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinConfig {
    pub source: String,
    pub kind: JoinKind,
    pub on: Vec<JoinOn>,
    /// Subset of joined-row fields to copy (all when absent).
    #[serde(default)]
    pub fields: Option<Vec<String>>,
    #[serde(default)]
    pub prefix: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    #[serde(default)]
    pub lookups: Vec<LookupConfig>,
    #[serde(default)]
    pub joins: Vec<JoinConfig>,
}

// ── Deduplication ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DedupAction {
    #[default]
    Skip,
    Update,
    Merge,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DedupConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Fields forming the dedup key; empty means hash the whole record.
    #[serde(default)]
    pub key_fields: Vec<String>,
    #[serde(default)]
    pub action: DedupAction,
    /// How many distinct keys the job remembers.
    #[serde(default = "default_dedup_window")]
    pub window: usize,
}

fn default_dedup_window() -> usize {
    100_000
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            key_fields: Vec::new(),
            action: DedupAction::Skip,
            window: default_dedup_window(),
        }
    }
}

// ── Quality ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityWeights {
    pub completeness: f64,
    pub accuracy: f64,
    pub consistency: f64,
    pub timeliness: f64,
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            completeness: 0.25,
            accuracy: 0.25,
            consistency: 0.25,
            timeliness: 0.25,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Field holding the record's event time.
    #[serde(default)]
    pub timestamp_field: Option<String>,
    /// Age at which timeliness reaches zero.
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,
    #[serde(default)]
    pub weights: QualityWeights,
    /// Records scoring below this are quarantined.
    #[serde(default)]
    pub min_score: Option<f64>,
}

fn default_max_age_secs() -> u64 {
    86_400
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timestamp_field: None,
            max_age_secs: default_max_age_secs(),
            weights: QualityWeights::default(),
            min_score: None,
        }
    }
}
