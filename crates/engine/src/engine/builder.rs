use std::sync::{Arc, Mutex};

use ledgerflow_core::EngineConfig;
use ledgerflow_ledger::HashChainLedger;
use ledgerflow_pipeline::{CustomRule, DuplicateHandler, PipelineExtensions, PipelineSettings, ScorerFactory, SideSource};
use ledgerflow_queue::QueueManager;
use tokio::sync::broadcast;

use super::{EngineInner, IngestionEngine, RuntimeState, EVENT_BUFFER};
use crate::audit::{AuditLogger, InMemoryAuditLog};
use crate::clock::{Clock, SystemClock};
use crate::connector::{ConnectorRegistry, SourceConnector};
use crate::error::EngineError;
use crate::registry::SourceRegistry;
use crate::schedule::{LogTrigger, ScheduleTrigger};
use crate::scheduler::SchedulerMetrics;
use crate::sink::{MemoryRecordSink, RecordSink};
use crate::store::JobStore;

/// Wires the engine's collaborators. Anything not supplied gets an
/// in-process default: system clock, in-memory audit log and record sink,
/// and a trigger that only logs.
pub struct EngineBuilder {
    config: EngineConfig,
    clock: Option<Arc<dyn Clock>>,
    audit: Option<Arc<dyn AuditLogger>>,
    connectors: ConnectorRegistry,
    sink: Option<Arc<dyn RecordSink>>,
    trigger: Option<Arc<dyn ScheduleTrigger>>,
    extensions: PipelineExtensions,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            clock: None,
            audit: None,
            connectors: ConnectorRegistry::new(),
            sink: None,
            trigger: None,
            extensions: PipelineExtensions::default(),
        }
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn audit_logger(mut self, logger: Arc<dyn AuditLogger>) -> Self {
        self.audit = Some(logger);
        self
    }

    pub fn connector(mut self, connector: Arc<dyn SourceConnector>) -> Self {
        self.connectors.register(connector);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn RecordSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn schedule_trigger(mut self, trigger: Arc<dyn ScheduleTrigger>) -> Self {
        self.trigger = Some(trigger);
        self
    }

    pub fn side_source(mut self, name: impl Into<String>, source: Arc<dyn SideSource>) -> Self {
        self.extensions = self.extensions.with_side_source(name, source);
        self
    }

    pub fn custom_rule(mut self, rule: Arc<dyn CustomRule>) -> Self {
        self.extensions = self.extensions.with_custom_rule(rule);
        self
    }

    pub fn duplicate_handler(mut self, handler: Arc<dyn DuplicateHandler>) -> Self {
        self.extensions = self.extensions.with_duplicate_handler(handler);
        self
    }

    pub fn scorers(mut self, factory: Arc<dyn ScorerFactory>) -> Self {
        self.extensions = self.extensions.with_scorers(factory);
        self
    }

    pub fn build(self) -> Result<IngestionEngine, EngineError> {
        self.config.validate()?;
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let audit = self
            .audit
            .unwrap_or_else(|| Arc::new(InMemoryAuditLog::with_max_entries(self.config.audit_max_entries)));

        let inner = EngineInner {
            settings: PipelineSettings::from(&self.config),
            queues: QueueManager::new(self.config.lanes),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            audit,
            connectors: self.connectors,
            sink: self.sink.unwrap_or_else(|| Arc::new(MemoryRecordSink::new())),
            trigger: self.trigger.unwrap_or_else(|| Arc::new(LogTrigger)),
            extensions: self.extensions,
            sources: SourceRegistry::new(),
            jobs: JobStore::new(),
            ledger: HashChainLedger::new(),
            runtime: Mutex::new(RuntimeState::default()),
            events,
            metrics: Mutex::new(SchedulerMetrics::default()),
            tick_lock: Mutex::new(()),
            ticker: Mutex::new(None),
            config: self.config,
        };
        Ok(IngestionEngine { inner: Arc::new(inner) })
    }
}
