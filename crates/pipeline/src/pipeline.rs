//! [`RecordPipeline`]: the per-job chain of stages.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use ledgerflow_core::{
    DataRecord, DataSource, DedupAction, EngineConfig, ErrorHandling, IngestionJob, IssueKind, QualityIssue,
    QualityMetrics, RecordMetadata, Severity, SourceSchema, ValidationConfig,
};
use serde_json::{Map, Value};
use tracing::trace;
use uuid::Uuid;

use crate::dedup::{DedupIndex, DuplicateHandler, DuplicateResolution};
use crate::enrich::{Enriched, Enricher, SideSource};
use crate::error::PipelineError;
use crate::finalize::{checksum, classify, content_hash};
use crate::pii::PiiDetector;
use crate::quality::{DefaultScorers, QualityEngine, ScorerFactory};
use crate::transform::{Transformed, Transformer};
use crate::validate::{CustomRule, Validator};

/// Pluggable collaborators shared by every job of an engine.
#[derive(Clone)]
pub struct PipelineExtensions {
    pub side_sources: HashMap<String, Arc<dyn SideSource>>,
    pub custom_rules: HashMap<String, Arc<dyn CustomRule>>,
    pub duplicate_handler: Option<Arc<dyn DuplicateHandler>>,
    pub scorers: Arc<dyn ScorerFactory>,
}

impl Default for PipelineExtensions {
    fn default() -> Self {
        Self {
            side_sources: HashMap::new(),
            custom_rules: HashMap::new(),
            duplicate_handler: None,
            scorers: Arc::new(DefaultScorers),
        }
    }
}

impl PipelineExtensions {
    pub fn with_side_source(mut self, name: impl Into<String>, source: Arc<dyn SideSource>) -> Self {
        self.side_sources.insert(name.into(), source);
        self
    }

    /// Register a custom rule under its own name.
    pub fn with_custom_rule(mut self, rule: Arc<dyn CustomRule>) -> Self {
        self.custom_rules.insert(rule.name().to_string(), rule);
        self
    }

    pub fn with_duplicate_handler(mut self, handler: Arc<dyn DuplicateHandler>) -> Self {
        self.duplicate_handler = Some(handler);
        self
    }

    pub fn with_scorers(mut self, factory: Arc<dyn ScorerFactory>) -> Self {
        self.scorers = factory;
        self
    }
}

/// Engine-wide settings the pipeline needs.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub pii_patterns: Vec<String>,
    pub default_retention_days: u32,
}

impl From<&EngineConfig> for PipelineSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            pii_patterns: config.pii_patterns.clone(),
            default_retention_days: config.default_retention_days,
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

/// What became of one input record.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    /// Finalized and ready to be sealed into the chain.
    Accepted(Box<DataRecord>),
    /// Validation failed under `Fail`, or a transform could not be applied.
    /// `fatal` asks the caller to fail the whole job.
    Failed { reasons: Vec<String>, fatal: bool },
    /// Validation failed under `Skip`.
    Skipped { reasons: Vec<String> },
    /// Validation failed under `Quarantine`, or quality fell below the minimum.
    Quarantined { data: Value, reasons: Vec<String> },
    /// Dropped by a filter or an inner join.
    Filtered { reason: String },
    /// Seen before within the dedup window and dropped.
    Duplicate { key: String },
}

impl RecordOutcome {
    pub fn kind(&self) -> &'static str {
        match self {
            RecordOutcome::Accepted(_) => "accepted",
            RecordOutcome::Failed { .. } => "failed",
            RecordOutcome::Skipped { .. } => "skipped",
            RecordOutcome::Quarantined { .. } => "quarantined",
            RecordOutcome::Filtered { .. } => "filtered",
            RecordOutcome::Duplicate { .. } => "duplicate",
        }
    }
}

/// Stage chain for one job run. Holds per-run state (dedup window,
/// consistency history), so a resumed job keeps using the same instance.
pub struct RecordPipeline {
    tenant_id: String,
    source_id: String,
    job_id: String,
    schema: SourceSchema,
    validation: ValidationConfig,
    validator: Validator,
    transformer: Transformer,
    enricher: Enricher,
    dedup: Option<(DedupIndex, DedupAction)>,
    duplicate_handler: Option<Arc<dyn DuplicateHandler>>,
    quality: Option<QualityEngine>,
    pii: PiiDetector,
    retention_days: u32,
    legal_hold: bool,
}

impl RecordPipeline {
    /// Build the chain, rejecting configurations that cannot run.
    pub fn new(
        source: &DataSource,
        job: &IngestionJob,
        extensions: &PipelineExtensions,
        settings: &PipelineSettings,
    ) -> Result<Self, PipelineError> {
        let config = &job.config;
        let validator = Validator::new(&job.tenant_id, &source.schema, &config.validation, &extensions.custom_rules)?;

        let dedup = if config.dedup.enabled {
            if config.dedup.action != DedupAction::Skip && extensions.duplicate_handler.is_none() {
                let action = format!("{:?}", config.dedup.action).to_lowercase();
                return Err(PipelineError::MissingDuplicateHandler(action));
            }
            Some((DedupIndex::new(&config.dedup), config.dedup.action))
        } else {
            None
        };

        let quality = config
            .quality
            .enabled
            .then(|| QualityEngine::new(&config.quality, extensions.scorers.as_ref()));

        Ok(Self {
            tenant_id: job.tenant_id.clone(),
            source_id: source.id.clone(),
            job_id: job.id.clone(),
            schema: source.schema.clone(),
            validation: config.validation.clone(),
            validator,
            transformer: Transformer::new(&config.transform),
            enricher: Enricher::new(&config.enrichment, &extensions.side_sources),
            dedup,
            duplicate_handler: extensions.duplicate_handler.clone(),
            quality,
            pii: PiiDetector::new(&settings.pii_patterns),
            retention_days: config.retention_days.unwrap_or(settings.default_retention_days),
            legal_hold: config.legal_hold,
        })
    }

    /// Run one raw record through every stage.
    pub async fn process(&mut self, raw: Value, now: DateTime<Utc>) -> RecordOutcome {
        let record = match raw {
            Value::Object(map) => map,
            other => return self.reject(other, vec!["record is not a JSON object".to_string()]),
        };

        if self.validation.enabled {
            let failures = self.validator.validate(&record);
            if !failures.is_empty() {
                let reasons = failures.iter().map(ToString::to_string).collect();
                return self.reject(Value::Object(record), reasons);
            }
        }

        let record = match self.transformer.apply(record) {
            Ok(Transformed::Kept(r)) => r,
            Ok(Transformed::Filtered(index)) => {
                return RecordOutcome::Filtered {
                    reason: format!("filter #{index}"),
                }
            }
            Err(e) => {
                return RecordOutcome::Failed {
                    reasons: vec![e.to_string()],
                    fatal: false,
                }
            }
        };

        let record = if self.enricher.is_noop() {
            record
        } else {
            match self.enricher.apply(record).await {
                Enriched::Kept(r) => r,
                Enriched::Filtered { source } => {
                    return RecordOutcome::Filtered {
                        reason: format!("no match in inner join on '{source}'"),
                    }
                }
            }
        };

        let mut duplicate_of = None;
        let mut new_key = None;
        let record = match self.dedup.as_mut() {
            None => record,
            Some((index, action)) => {
                let key = index.key_for(&record);
                if !index.contains(&key) {
                    new_key = Some(key);
                    record
                } else {
                    trace!(job_id = %self.job_id, key = %key, "duplicate record");
                    let resolution = match (*action, &self.duplicate_handler) {
                        (DedupAction::Skip, _) | (_, None) => DuplicateResolution::Drop,
                        (action, Some(handler)) => handler.resolve(action, &key, record),
                    };
                    match resolution {
                        DuplicateResolution::Drop => return RecordOutcome::Duplicate { key },
                        DuplicateResolution::Keep(r) => {
                            duplicate_of = Some(key);
                            r
                        }
                    }
                }
            }
        };

        let mut quality = match self.quality.as_mut() {
            Some(engine) => {
                let metrics = engine.assess(&record, &self.schema, now);
                if let Some(min) = engine.below_minimum(&metrics) {
                    return RecordOutcome::Quarantined {
                        data: Value::Object(record),
                        reasons: vec![format!("quality score {:.3} below minimum {min}", metrics.score)],
                    };
                }
                metrics
            }
            None => QualityMetrics::perfect(),
        };
        // The key is claimed only by a record that reaches the ledger.
        if let (Some(key), Some((index, _))) = (new_key, self.dedup.as_mut()) {
            index.insert(key);
        }
        if let Some(key) = duplicate_of {
            quality.issues.push(QualityIssue::new(
                None,
                IssueKind::Duplicate,
                Severity::Low,
                format!("kept duplicate of key {key}"),
            ));
        }

        RecordOutcome::Accepted(Box::new(self.finalize(record, quality, now)))
    }

    fn reject(&self, data: Value, reasons: Vec<String>) -> RecordOutcome {
        match self.validation.error_handling {
            ErrorHandling::Fail => RecordOutcome::Failed {
                reasons,
                fatal: self.validation.strict_mode,
            },
            ErrorHandling::Skip => RecordOutcome::Skipped { reasons },
            ErrorHandling::Quarantine => RecordOutcome::Quarantined { data, reasons },
        }
    }

    fn finalize(&self, record: Map<String, Value>, quality: QualityMetrics, now: DateTime<Utc>) -> DataRecord {
        let pii_fields = self.pii.detect(&record, &self.schema);
        let data = Value::Object(record);
        let classification = classify(&data, &self.schema, &pii_fields);
        let checksum = checksum(&data);
        let hash = content_hash(&self.tenant_id, &self.source_id, &self.job_id, &checksum, now);
        DataRecord {
            id: Uuid::new_v4().to_string(),
            tenant_id: self.tenant_id.clone(),
            source_id: self.source_id.clone(),
            job_id: self.job_id.clone(),
            data,
            metadata: RecordMetadata {
                version: 1,
                checksum,
                pii_fields,
                classification,
                retention_days: self.retention_days,
                legal_hold: self.legal_hold,
            },
            quality,
            hash,
            previous_hash: String::new(),
            chain_hash: String::new(),
            ingested_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerflow_core::{
        Classification, ConnectionConfig, DedupConfig, FieldDef, FieldType, FileConnection, JobConfig, JobType,
        Priority, QualityConfig, RuleKind, ValidationRule,
    };
    use serde_json::json;

    fn source(schema: SourceSchema) -> DataSource {
        DataSource::new(
            "src-1",
            "orders",
            "t1",
            ConnectionConfig::File(FileConnection {
                path: "/tmp/orders.jsonl".into(),
                format: "jsonl".into(),
            }),
            schema,
        )
    }

    fn schema() -> SourceSchema {
        SourceSchema {
            fields: vec![
                FieldDef::new("id", FieldType::Integer).required(),
                FieldDef::new("email", FieldType::String).pii(),
            ],
            primary_key: vec!["id".into()],
            tenant_field: None,
        }
    }

    fn job(config: JobConfig) -> IngestionJob {
        IngestionJob::new("src-1", "t1", JobType::Batch, Priority::Medium, config, Utc::now())
    }

    fn pipeline(config: JobConfig) -> RecordPipeline {
        RecordPipeline::new(
            &source(schema()),
            &job(config),
            &PipelineExtensions::default(),
            &PipelineSettings::default(),
        )
        .unwrap()
    }

    fn with_handling(handling: ErrorHandling) -> JobConfig {
        let mut config = JobConfig::default();
        config.validation.error_handling = handling;
        config
    }

    struct MergeLatest;

    impl DuplicateHandler for MergeLatest {
        fn resolve(&self, _action: DedupAction, _key: &str, mut record: Map<String, Value>) -> DuplicateResolution {
            record.insert("merged".into(), json!(true));
            DuplicateResolution::Keep(record)
        }
    }

    #[tokio::test]
    async fn valid_record_is_accepted_and_classified() {
        let mut p = pipeline(JobConfig::default());
        let now = Utc::now();
        let RecordOutcome::Accepted(record) = p.process(json!({"id": 1, "email": "a@b.c"}), now).await else {
            panic!("expected accepted");
        };
        assert_eq!(record.tenant_id, "t1");
        assert_eq!(record.metadata.pii_fields, vec!["email"]);
        assert_eq!(record.metadata.classification, Classification::Confidential);
        assert_eq!(record.metadata.retention_days, 365);
        assert_eq!(record.metadata.checksum, checksum(&json!({"email": "a@b.c", "id": 1})));
        assert_eq!(record.hash.len(), 64);
        assert!(record.chain_hash.is_empty());
        assert_eq!(record.quality.score, 1.0);
    }

    #[tokio::test]
    async fn validation_failure_follows_error_handling() {
        let bad = json!({"email": "x"});
        let now = Utc::now();

        let outcome = pipeline(with_handling(ErrorHandling::Fail)).process(bad.clone(), now).await;
        assert!(matches!(outcome, RecordOutcome::Failed { fatal: true, .. }));

        let mut lenient = with_handling(ErrorHandling::Fail);
        lenient.validation.strict_mode = false;
        let outcome = pipeline(lenient).process(bad.clone(), now).await;
        assert!(matches!(outcome, RecordOutcome::Failed { fatal: false, .. }));

        let outcome = pipeline(with_handling(ErrorHandling::Skip)).process(bad.clone(), now).await;
        assert_eq!(outcome.kind(), "skipped");

        let outcome = pipeline(with_handling(ErrorHandling::Quarantine)).process(bad.clone(), now).await;
        match outcome {
            RecordOutcome::Quarantined { data, reasons } => {
                assert_eq!(data, bad);
                assert!(reasons[0].contains("id"));
            }
            other => panic!("expected quarantine, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_object_records_are_rejected() {
        let outcome = pipeline(with_handling(ErrorHandling::Skip)).process(json!([1, 2]), Utc::now()).await;
        assert_eq!(outcome.kind(), "skipped");
    }

    #[tokio::test]
    async fn disabled_validation_lets_anything_through() {
        let mut config = JobConfig::default();
        config.validation.enabled = false;
        config.validation.rules = vec![ValidationRule::new("zzz", RuleKind::Required)];
        let outcome = pipeline(config).process(json!({"other": 1}), Utc::now()).await;
        assert_eq!(outcome.kind(), "accepted");
    }

    #[tokio::test]
    async fn dedup_skip_drops_second_copy() {
        let mut config = JobConfig::default();
        config.dedup = DedupConfig {
            enabled: true,
            key_fields: vec!["id".into()],
            ..Default::default()
        };
        let mut p = pipeline(config);
        let now = Utc::now();
        assert_eq!(p.process(json!({"id": 1}), now).await.kind(), "accepted");
        assert_eq!(p.process(json!({"id": 1, "email": "x"}), now).await.kind(), "duplicate");
        assert_eq!(p.process(json!({"id": 2}), now).await.kind(), "accepted");
    }

    #[test]
    fn merge_without_handler_is_rejected() {
        let mut config = JobConfig::default();
        config.dedup = DedupConfig {
            enabled: true,
            action: DedupAction::Merge,
            ..Default::default()
        };
        let err = RecordPipeline::new(
            &source(schema()),
            &job(config),
            &PipelineExtensions::default(),
            &PipelineSettings::default(),
        )
        .err()
        .unwrap();
        assert_eq!(err, PipelineError::MissingDuplicateHandler("merge".into()));
    }

    #[tokio::test]
    async fn merge_handler_keeps_duplicate_with_issue() {
        let mut config = JobConfig::default();
        config.dedup = DedupConfig {
            enabled: true,
            key_fields: vec!["id".into()],
            action: DedupAction::Merge,
            ..Default::default()
        };
        let extensions = PipelineExtensions::default().with_duplicate_handler(Arc::new(MergeLatest));
        let mut p =
            RecordPipeline::new(&source(schema()), &job(config), &extensions, &PipelineSettings::default()).unwrap();
        let now = Utc::now();
        p.process(json!({"id": 1}), now).await;
        let RecordOutcome::Accepted(record) = p.process(json!({"id": 1}), now).await else {
            panic!("expected merged duplicate to be accepted");
        };
        assert_eq!(record.data["merged"], json!(true));
        assert!(record.quality.issues.iter().any(|i| i.kind == IssueKind::Duplicate));
    }

    #[tokio::test]
    async fn low_quality_is_quarantined() {
        let mut config = JobConfig::default();
        config.quality = QualityConfig {
            min_score: Some(0.99),
            ..Default::default()
        };
        let mut p = pipeline(config);
        // email missing → completeness 0.5
        let outcome = p.process(json!({"id": 1}), Utc::now()).await;
        assert_eq!(outcome.kind(), "quarantined");
    }

    #[tokio::test]
    async fn quarantined_record_leaves_dedup_key_free() {
        let mut config = JobConfig::default();
        config.quality = QualityConfig {
            min_score: Some(0.99),
            ..Default::default()
        };
        config.dedup = DedupConfig {
            enabled: true,
            key_fields: vec!["id".into()],
            ..Default::default()
        };
        let mut p = pipeline(config);
        let now = Utc::now();

        assert_eq!(p.process(json!({"id": 1}), now).await.kind(), "quarantined");
        // The corrected copy is the first one to be accepted.
        assert_eq!(p.process(json!({"id": 1, "email": "a@b.c"}), now).await.kind(), "accepted");
        assert_eq!(p.process(json!({"id": 1, "email": "a@b.c"}), now).await.kind(), "duplicate");
    }

    #[tokio::test]
    async fn transform_error_fails_record_not_job() {
        let mut config = JobConfig::default();
        config.transform.mappings = vec![ledgerflow_core::FieldMapping {
            source: "id".into(),
            target: "id".into(),
            transform: Some(ledgerflow_core::TransformFn::Boolean),
            default: None,
        }];
        let outcome = pipeline(config).process(json!({"id": 7}), Utc::now()).await;
        assert!(matches!(outcome, RecordOutcome::Failed { fatal: false, .. }));
    }

    #[tokio::test]
    async fn job_retention_and_legal_hold_propagate() {
        let mut config = JobConfig::default();
        config.retention_days = Some(30);
        config.legal_hold = true;
        let RecordOutcome::Accepted(record) = pipeline(config).process(json!({"id": 1}), Utc::now()).await else {
            panic!("expected accepted");
        };
        assert_eq!(record.metadata.retention_days, 30);
        assert!(record.metadata.legal_hold);
        assert_eq!(record.metadata.classification, Classification::Internal);
    }
}
