//! Record validation: schema-required fields, tenant attribution and the
//! job's configured rules.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use ledgerflow_core::{RuleKind, SourceSchema, ValidationConfig};
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::PipelineError;
use crate::fields::{get_path, is_present, key_string, values_equal};

/// User-supplied check referenced by `RuleKind::Custom { name }`.
pub trait CustomRule: Send + Sync {
    fn name(&self) -> &str;

    /// `Err(reason)` fails the record.
    fn check(&self, value: Option<&Value>, record: &Map<String, Value>) -> Result<(), String>;
}

/// One reason a record was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationFailure {
    pub field: Option<String>,
    pub message: String,
}

impl ValidationFailure {
    fn new(field: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            field: field.map(str::to_string),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field {
            Some(field) => write!(f, "{field}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

enum Check {
    Required,
    Regex(Regex),
    Range { min: Option<f64>, max: Option<f64> },
    Enum(Vec<Value>),
    Custom(Arc<dyn CustomRule>),
}

struct CompiledRule {
    field: String,
    check: Check,
    message: Option<String>,
}

/// Validation stage, compiled once per job.
pub struct Validator {
    tenant_id: String,
    schema: SourceSchema,
    rules: Vec<CompiledRule>,
}

impl Validator {
    /// Compile the job's rules. Bad regexes and unknown custom rules are
    /// configuration errors surfaced at job creation.
    pub fn new(
        tenant_id: &str,
        schema: &SourceSchema,
        config: &ValidationConfig,
        custom_rules: &HashMap<String, Arc<dyn CustomRule>>,
    ) -> Result<Self, PipelineError> {
        let mut rules = Vec::with_capacity(config.rules.len());
        for rule in &config.rules {
            let check = match &rule.kind {
                RuleKind::Required => Check::Required,
                RuleKind::Regex { pattern } => {
                    let re = Regex::new(pattern).map_err(|e| PipelineError::InvalidRegex {
                        field: rule.field.clone(),
                        pattern: pattern.clone(),
                        reason: e.to_string(),
                    })?;
                    Check::Regex(re)
                }
                RuleKind::Range { min, max } => Check::Range {
                    min: *min,
                    max: *max,
                },
                RuleKind::Enum { values } => Check::Enum(values.clone()),
                RuleKind::Custom { name } => {
                    let custom = custom_rules
                        .get(name)
                        .cloned()
                        .ok_or_else(|| PipelineError::UnknownCustomRule(name.clone()))?;
                    Check::Custom(custom)
                }
            };
            rules.push(CompiledRule {
                field: rule.field.clone(),
                check,
                message: rule.message.clone(),
            });
        }
        Ok(Self {
            tenant_id: tenant_id.to_string(),
            schema: schema.clone(),
            rules,
        })
    }

    /// Every failure for `record`; empty means valid.
    pub fn validate(&self, record: &Map<String, Value>) -> Vec<ValidationFailure> {
        let mut failures = Vec::new();

        for field in self.schema.required_fields() {
            if !is_present(record, &field.name) {
                failures.push(ValidationFailure::new(Some(&field.name), "required field missing"));
            }
        }

        if let Some(tenant_field) = &self.schema.tenant_field {
            if let Some(value) = get_path(record, tenant_field).filter(|v| !v.is_null()) {
                let claimed = key_string(value);
                if claimed != self.tenant_id {
                    failures.push(ValidationFailure::new(
                        Some(tenant_field),
                        format!("record belongs to tenant '{claimed}', job runs for '{}'", self.tenant_id),
                    ));
                }
            }
        }

        for rule in &self.rules {
            if let Err(reason) = self.apply(rule, record) {
                let message = rule.message.clone().unwrap_or(reason);
                failures.push(ValidationFailure::new(Some(&rule.field), message));
            }
        }

        failures
    }

    fn apply(&self, rule: &CompiledRule, record: &Map<String, Value>) -> Result<(), String> {
        let value = get_path(record, &rule.field).filter(|v| !v.is_null());
        match &rule.check {
            Check::Required => match value {
                Some(_) => Ok(()),
                None => Err("required field missing".into()),
            },
            // Presence is the job of `Required`; the value checks below only
            // look at fields that are there.
            Check::Regex(re) => match value {
                None => Ok(()),
                Some(Value::String(s)) if re.is_match(s) => Ok(()),
                Some(Value::Number(n)) if re.is_match(&n.to_string()) => Ok(()),
                Some(_) => Err(format!("does not match pattern {}", re.as_str())),
            },
            Check::Range { min, max } => {
                let Some(value) = value else {
                    return Ok(());
                };
                let n = value
                    .as_f64()
                    .ok_or_else(|| format!("expected a number, found {value}"))?;
                if let Some(min) = min {
                    if n < *min {
                        return Err(format!("{n} is below minimum {min}"));
                    }
                }
                if let Some(max) = max {
                    if n > *max {
                        return Err(format!("{n} is above maximum {max}"));
                    }
                }
                Ok(())
            }
            Check::Enum(allowed) => match value {
                None => Ok(()),
                Some(v) if allowed.iter().any(|a| values_equal(a, v)) => Ok(()),
                Some(v) => Err(format!("{v} is not an allowed value")),
            },
            Check::Custom(custom) => custom
                .check(value, record)
                .map_err(|reason| format!("{}: {reason}", custom.name())),
        }
    }
}
