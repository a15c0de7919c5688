//! Transform stage: field mappings, filters, calculated fields.

pub mod coerce;
pub mod expr;
pub mod filter;

use ledgerflow_core::TransformConfig;
use serde_json::{Map, Value};

use crate::error::PipelineError;
use crate::fields::{get_path, remove_path, set_path};

pub use coerce::parse_timestamp;

/// Result of running the transform stage on one record.
#[derive(Debug, Clone, PartialEq)]
pub enum Transformed {
    Kept(Map<String, Value>),
    /// Dropped by the filter at this index.
    Filtered(usize),
}

#[derive(Debug, Clone)]
pub struct Transformer {
    config: TransformConfig,
}

impl Transformer {
    pub fn new(config: &TransformConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Mappings, then filters, then calculated fields in declaration order.
    ///
    /// Mappings read from the input as it arrived, so two mappings sharing a
    /// source both see it. A mapped source is removed unless it is also the
    /// target; unmapped fields pass through.
    pub fn apply(&self, input: Map<String, Value>) -> Result<Transformed, PipelineError> {
        let mut output = input;

        if !self.config.mappings.is_empty() {
            let original = output.clone();
            let mut assignments = Vec::with_capacity(self.config.mappings.len());
            for mapping in &self.config.mappings {
                let value = get_path(&original, &mapping.source)
                    .filter(|v| !v.is_null())
                    .cloned()
                    .or_else(|| mapping.default.clone());
                let Some(value) = value else {
                    continue;
                };
                let value = match mapping.transform {
                    Some(f) => coerce::apply(f, value).map_err(|reason| PipelineError::Transform {
                        field: mapping.source.clone(),
                        transform: coerce::name(f).to_string(),
                        reason,
                    })?,
                    None => value,
                };
                assignments.push((mapping.target.as_str(), value));
            }
            for mapping in &self.config.mappings {
                if mapping.source != mapping.target {
                    remove_path(&mut output, &mapping.source);
                }
            }
            for (target, value) in assignments {
                set_path(&mut output, target, value);
            }
        }

        if let Some(index) = self
            .config
            .filters
            .iter()
            .position(|rule| !filter::matches(rule, &output))
        {
            return Ok(Transformed::Filtered(index));
        }

        for calc in &self.config.calculated_fields {
            let value = expr::eval(&calc.expression, &output).map_err(|reason| PipelineError::Expression {
                field: calc.name.clone(),
                reason,
            })?;
            set_path(&mut output, &calc.name, value);
        }

        Ok(Transformed::Kept(output))
    }
}
