//! Source connector collaborator.
//!
//! A connector turns a [`DataSource`] into a lazy, finite, non-restartable
//! stream of raw JSON records. The engine ships an in-memory connector;
//! real I/O connectors are supplied by the integrator.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use ledgerflow_core::{DataSource, IngestionJob, SourceType};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::ConnectorError;

/// Raw records of one job run.
pub type RecordStream = BoxStream<'static, Result<Value, ConnectorError>>;

#[async_trait]
pub trait SourceConnector: Send + Sync {
    fn source_type(&self) -> SourceType;

    async fn test_connection(&self, source: &DataSource) -> Result<bool, ConnectorError>;

    async fn open(&self, source: &DataSource, job: &IngestionJob) -> Result<RecordStream, ConnectorError>;

    /// Number of records the next stream will yield, when known up front.
    async fn record_count_hint(&self, _source: &DataSource) -> Option<u64> {
        None
    }
}

/// Connectors keyed by the source type they serve.
#[derive(Clone, Default)]
pub struct ConnectorRegistry {
    connectors: HashMap<SourceType, Arc<dyn SourceConnector>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `connector`, replacing any previous one for its type.
    pub fn register(&mut self, connector: Arc<dyn SourceConnector>) {
        self.connectors.insert(connector.source_type(), connector);
    }

    pub fn get(&self, source_type: SourceType) -> Result<Arc<dyn SourceConnector>, ConnectorError> {
        self.connectors
            .get(&source_type)
            .cloned()
            .ok_or(ConnectorError::Unsupported(source_type))
    }

    pub fn source_types(&self) -> Vec<SourceType> {
        SourceType::ALL
            .into_iter()
            .filter(|t| self.connectors.contains_key(t))
            .collect()
    }
}

enum Feed {
    Fixed(Vec<Result<Value, ConnectorError>>),
    Live(mpsc::UnboundedReceiver<Result<Value, ConnectorError>>),
}

/// In-memory connector for tests and demos.
///
/// Fixed record lists replay on every open. Live feeds are drained by the
/// first open only and end when the feeding sender is dropped.
pub struct MemoryConnector {
    source_type: SourceType,
    feeds: Mutex<HashMap<String, Feed>>,
    healthy: AtomicBool,
    opened: AtomicUsize,
}

impl MemoryConnector {
    pub fn new(source_type: SourceType) -> Self {
        Self {
            source_type,
            feeds: Mutex::new(HashMap::new()),
            healthy: AtomicBool::new(true),
            opened: AtomicUsize::new(0),
        }
    }

    fn feeds(&self) -> std::sync::MutexGuard<'_, HashMap<String, Feed>> {
        self.feeds.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn with_records(self, source_id: impl Into<String>, records: Vec<Value>) -> Self {
        self.set_records(source_id, records);
        self
    }

    pub fn set_records(&self, source_id: impl Into<String>, records: Vec<Value>) {
        self.feeds()
            .insert(source_id.into(), Feed::Fixed(records.into_iter().map(Ok).collect()));
    }

    /// Records followed by a read error.
    pub fn set_failing(&self, source_id: impl Into<String>, records: Vec<Value>, error: ConnectorError) {
        let mut items: Vec<_> = records.into_iter().map(Ok).collect();
        items.push(Err(error));
        self.feeds().insert(source_id.into(), Feed::Fixed(items));
    }

    /// Live feed: push records through the returned sender, drop it to end
    /// the stream.
    pub fn feed(&self, source_id: impl Into<String>) -> mpsc::UnboundedSender<Result<Value, ConnectorError>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.feeds().insert(source_id.into(), Feed::Live(rx));
        tx
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// How many streams have been opened.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceConnector for MemoryConnector {
    fn source_type(&self) -> SourceType {
        self.source_type
    }

    async fn test_connection(&self, _source: &DataSource) -> Result<bool, ConnectorError> {
        Ok(self.healthy.load(Ordering::SeqCst))
    }

    async fn open(&self, source: &DataSource, _job: &IngestionJob) -> Result<RecordStream, ConnectorError> {
        if !self.healthy.load(Ordering::SeqCst) {
            return Err(ConnectorError::Unavailable(format!("source {} is unreachable", source.id)));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);

        let mut feeds = self.feeds();
        let stream = match feeds.remove(&source.id) {
            None => stream::empty().boxed(),
            Some(Feed::Fixed(items)) => {
                let replay = stream::iter(items.clone()).boxed();
                feeds.insert(source.id.clone(), Feed::Fixed(items));
                replay
            }
            Some(Feed::Live(rx)) => {
                stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) }).boxed()
            }
        };
        Ok(stream)
    }

    async fn record_count_hint(&self, source: &DataSource) -> Option<u64> {
        match self.feeds().get(&source.id) {
            Some(Feed::Fixed(items)) => Some(items.iter().filter(|i| i.is_ok()).count() as u64),
            _ => None,
        }
    }
}
