//! Quality scoring stage.
//!
//! Completeness and timeliness are fixed formulas. Accuracy and consistency
//! are pluggable [`QualityScorer`]s created per job, since consistency
//! carries state across the records of a run.

pub mod scorers;

use chrono::{DateTime, Utc};
use ledgerflow_core::{QualityConfig, QualityIssue, QualityMetrics, QualityWeights, SourceSchema};
use serde_json::{Map, Value};

pub use scorers::{TypeAccuracyScorer, TypeConsistencyScorer};

/// One quality dimension. Implementations return a score in `[0, 1]` and
/// push any issues they find.
pub trait QualityScorer: Send {
    fn name(&self) -> &str;

    fn score(&mut self, record: &Map<String, Value>, schema: &SourceSchema, issues: &mut Vec<QualityIssue>) -> f64;
}

/// Builds the per-job accuracy and consistency scorers.
pub trait ScorerFactory: Send + Sync {
    fn accuracy(&self) -> Box<dyn QualityScorer>;
    fn consistency(&self) -> Box<dyn QualityScorer>;
}

/// Type-based scorers.
#[derive(Debug, Default)]
pub struct DefaultScorers;

impl ScorerFactory for DefaultScorers {
    fn accuracy(&self) -> Box<dyn QualityScorer> {
        Box::new(TypeAccuracyScorer)
    }

    fn consistency(&self) -> Box<dyn QualityScorer> {
        Box::new(TypeConsistencyScorer::default())
    }
}

pub struct QualityEngine {
    config: QualityConfig,
    accuracy: Box<dyn QualityScorer>,
    consistency: Box<dyn QualityScorer>,
}

impl QualityEngine {
    pub fn new(config: &QualityConfig, factory: &dyn ScorerFactory) -> Self {
        Self {
            config: config.clone(),
            accuracy: factory.accuracy(),
            consistency: factory.consistency(),
        }
    }

    pub fn assess(&mut self, record: &Map<String, Value>, schema: &SourceSchema, now: DateTime<Utc>) -> QualityMetrics {
        let mut issues = Vec::new();
        let completeness = clamp(scorers::completeness(record, schema, &mut issues));
        let accuracy = clamp(self.accuracy.score(record, schema, &mut issues));
        let consistency = clamp(self.consistency.score(record, schema, &mut issues));
        let timeliness = clamp(scorers::timeliness(record, &self.config, now, &mut issues));
        let score = weighted(&self.config.weights, completeness, accuracy, consistency, timeliness);
        QualityMetrics {
            completeness,
            accuracy,
            consistency,
            timeliness,
            score,
            issues,
        }
    }

    /// Whether `metrics` falls below the configured minimum.
    pub fn below_minimum(&self, metrics: &QualityMetrics) -> Option<f64> {
        self.config.min_score.filter(|min| metrics.score < *min)
    }
}

fn clamp(x: f64) -> f64 {
    if x.is_nan() {
        0.0
    } else {
        x.clamp(0.0, 1.0)
    }
}

/// Weighted mean; equal weights when the configured ones sum to zero.
fn weighted(w: &QualityWeights, c: f64, a: f64, k: f64, t: f64) -> f64 {
    let weights = [w.completeness, w.accuracy, w.consistency, w.timeliness].map(|x| x.max(0.0));
    let total: f64 = weights.iter().sum();
    let scores = [c, a, k, t];
    if total <= 0.0 {
        return clamp(scores.iter().sum::<f64>() / 4.0);
    }
    clamp(weights.iter().zip(scores).map(|(w, s)| w * s).sum::<f64>() / total)
}
