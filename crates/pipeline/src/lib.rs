//! Per-record processing chain.
//!
//! Stages run in a fixed order and short-circuit on the first terminal
//! outcome: validate → transform → enrich → deduplicate → score quality.
//! Survivors are finalized (checksum, content hash, PII classification)
//! and sealed into the tenant's hash chain.

pub mod dedup;
pub mod enrich;
pub mod error;
pub mod fields;
pub mod finalize;
pub mod pii;
pub mod pipeline;
pub mod quality;
pub mod transform;
pub mod validate;

pub use dedup::{DedupIndex, DuplicateHandler, DuplicateResolution};
pub use enrich::{Enricher, SideSource, StaticSideSource};
pub use error::{EnrichmentError, PipelineError};
pub use finalize::{canonical_json, checksum, seal};
pub use pii::PiiDetector;
pub use pipeline::{PipelineExtensions, PipelineSettings, RecordOutcome, RecordPipeline};
pub use quality::{DefaultScorers, QualityEngine, QualityScorer, ScorerFactory};
pub use transform::Transformer;
pub use validate::{CustomRule, ValidationFailure, Validator};
