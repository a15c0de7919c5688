//! Ingestion engine: source registry, job lifecycle, priority scheduling and
//! the control API, wired to the record pipeline and the hash chain ledger.

pub mod audit;
pub mod clock;
pub mod connector;
pub mod engine;
pub mod error;
pub mod events;
pub mod registry;
pub mod schedule;
pub mod scheduler;
pub mod sink;
pub mod store;

pub use audit::{AuditCategory, AuditEntry, AuditLogger, AuditQuery, AuditSeverity, InMemoryAuditLog};
pub use clock::{Clock, ManualClock, SystemClock};
pub use connector::{ConnectorRegistry, MemoryConnector, RecordStream, SourceConnector};
pub use engine::{CreateJobRequest, EngineBuilder, IngestionEngine};
pub use error::{AuditError, ConnectorError, EngineError};
pub use events::{JobCompletion, JobEvent, JobEventKind, JobOutcome};
pub use registry::SourceRegistry;
pub use schedule::{next_run, parse_interval, LogTrigger, RecordingTrigger, ScheduleTrigger};
pub use scheduler::{RunTotals, SchedulerMetrics, TickReport};
pub use sink::{MemoryRecordSink, RecordSink};
pub use store::{JobStore, QuarantinedRecord};
