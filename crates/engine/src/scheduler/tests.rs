use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use ledgerflow_core::{
    ConnectionConfig, DataSource, EngineConfig, FieldDef, FieldType, FileConnection, JobStatus, LaneCapacities,
    Priority, SourceSchema, SourceType,
};
use serde_json::json;

use crate::clock::ManualClock;
use crate::connector::MemoryConnector;
use crate::engine::{CreateJobRequest, IngestionEngine};

fn source(id: &str) -> DataSource {
    DataSource::new(
        id,
        "orders",
        "t1",
        ConnectionConfig::File(FileConnection {
            path: "orders.jsonl".into(),
            format: "jsonl".into(),
        }),
        SourceSchema {
            fields: vec![FieldDef::new("id", FieldType::Integer).required()],
            primary_key: vec!["id".into()],
            tenant_field: None,
        },
    )
}

async fn engine_with(connector: Arc<MemoryConnector>) -> IngestionEngine {
    let config = EngineConfig {
        lanes: LaneCapacities::uniform(8),
        tick_interval_ms: 10,
        ..Default::default()
    };
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()));
    let engine = IngestionEngine::builder(config)
        .clock(clock)
        .connector(connector)
        .build()
        .unwrap();
    engine.register_data_source(source("s1")).await.unwrap();
    engine
}

#[tokio::test]
async fn overlapping_tick_is_skipped() {
    let engine = engine_with(Arc::new(MemoryConnector::new(SourceType::File))).await;
    let _held = engine.inner.tick_lock.lock().unwrap();
    let report = engine.tick();
    assert!(report.skipped);
    assert!(report.started.is_empty());
    assert_eq!(engine.scheduler_metrics().ticks, 0);
}

#[tokio::test]
async fn lanes_are_served_in_priority_order_one_job_each() {
    let connector = Arc::new(MemoryConnector::new(SourceType::File).with_records("s1", vec![json!({"id": 1})]));
    let engine = engine_with(connector).await;

    let low = engine.create_ingestion_job(CreateJobRequest::new("s1", "t1", Priority::Low)).await.unwrap();
    let crit_a = engine
        .create_ingestion_job(CreateJobRequest::new("s1", "t1", Priority::Critical))
        .await
        .unwrap();
    let crit_b = engine
        .create_ingestion_job(CreateJobRequest::new("s1", "t1", Priority::Critical))
        .await
        .unwrap();

    let report = engine.tick();
    assert_eq!(report.occupancy, [2, 0, 0, 1]);
    assert_eq!(report.started, vec![crit_a.id.clone(), low.id.clone()]);
    assert_eq!(engine.get_job(&crit_b.id).unwrap().status, JobStatus::Pending);

    let report = engine.tick();
    assert_eq!(report.started, vec![crit_b.id]);
}

#[tokio::test]
async fn busy_job_is_deferred_not_started_twice() {
    let engine = engine_with(Arc::new(MemoryConnector::new(SourceType::File))).await;
    let job = engine.create_ingestion_job(CreateJobRequest::new("s1", "t1", Priority::High)).await.unwrap();

    engine.inner.runtime().processing.insert(job.id.clone());
    let report = engine.tick();
    assert!(report.started.is_empty());
    assert_eq!(report.deferred, vec![job.id.clone()]);
    assert_eq!(engine.get_job(&job.id).unwrap().status, JobStatus::Pending);
    assert_eq!(engine.get_queue("high").unwrap().pending, vec![job.id.clone()]);

    engine.inner.runtime().processing.remove(&job.id);
    assert_eq!(engine.tick().started, vec![job.id]);
}

#[tokio::test]
async fn stale_lane_entries_are_reconciled() {
    let engine = engine_with(Arc::new(MemoryConnector::new(SourceType::File))).await;
    let job = engine.create_ingestion_job(CreateJobRequest::new("s1", "t1", Priority::Medium)).await.unwrap();

    // Status changed behind the lane's back.
    engine.inner.jobs.update(&job.id, |j| j.status = JobStatus::Cancelled);
    let report = engine.tick();
    assert_eq!(report.occupancy, [0, 0, 0, 0]);
    assert!(report.started.is_empty());
    assert!(engine.inner.runtime().processing.is_empty());
}

#[tokio::test]
async fn start_runs_ticks_until_shutdown() {
    let connector = Arc::new(MemoryConnector::new(SourceType::File).with_records("s1", vec![json!({"id": 1})]));
    let engine = engine_with(connector).await;
    let job = engine.create_ingestion_job(CreateJobRequest::new("s1", "t1", Priority::Low)).await.unwrap();
    let done = engine.subscribe(&job.id).unwrap();

    assert!(engine.start());
    assert!(!engine.start());
    assert!(engine.is_scheduling());

    let outcome = tokio::time::timeout(Duration::from_secs(5), done.wait())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome.status, JobStatus::Completed);

    engine.shutdown().await;
    assert!(!engine.is_scheduling());
    let metrics = engine.scheduler_metrics();
    assert!(metrics.ticks >= 1);
    assert_eq!(metrics.jobs_started, 1);
    assert_eq!(metrics.finished("completed"), 1);
}

/// Connector whose `open` blocks until released, then fails.
struct GatedConnector {
    gate: tokio::sync::Notify,
}

#[async_trait::async_trait]
impl crate::connector::SourceConnector for GatedConnector {
    fn source_type(&self) -> SourceType {
        SourceType::File
    }

    async fn test_connection(&self, _source: &DataSource) -> Result<bool, crate::error::ConnectorError> {
        Ok(true)
    }

    async fn open(
        &self,
        source: &DataSource,
        _job: &ledgerflow_core::IngestionJob,
    ) -> Result<crate::connector::RecordStream, crate::error::ConnectorError> {
        self.gate.notified().await;
        Err(crate::error::ConnectorError::Unavailable(format!("{} went away", source.id)))
    }
}

#[tokio::test]
async fn open_failure_after_pause_still_fails_the_job() {
    let connector = Arc::new(GatedConnector {
        gate: tokio::sync::Notify::new(),
    });
    let engine = IngestionEngine::builder(EngineConfig::default())
        .connector(connector.clone())
        .build()
        .unwrap();
    engine.register_data_source(source("s1")).await.unwrap();

    let job = engine.create_ingestion_job(CreateJobRequest::new("s1", "t1", Priority::High)).await.unwrap();
    let done = engine.subscribe(&job.id).unwrap();
    assert_eq!(engine.tick().started, vec![job.id.clone()]);

    assert_eq!(engine.pause_job(&job.id).await.unwrap().status, JobStatus::Paused);
    connector.gate.notify_one();

    let outcome = tokio::time::timeout(Duration::from_secs(5), done.wait()).await.unwrap().unwrap();
    assert_eq!(outcome.status, JobStatus::Failed);
    let failed = engine.get_job(&job.id).unwrap();
    assert_eq!(failed.error_count, 1);
    assert!(failed.last_error.unwrap().starts_with("CONNECTOR_ERROR"));
    assert!(engine.inner.runtime().suspended.is_empty());
    assert!(engine.tick().started.is_empty());
}
