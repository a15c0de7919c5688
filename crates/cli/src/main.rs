mod cli;
mod file_source;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use ledgerflow_core::{
    load_dotenv, AuditLogConnection, ConnectionConfig, DataSource, DedupConfig, EngineConfig, FieldDef, FieldType, FileConnection,
    JobConfig, JobStatus, Priority, SourceSchema, SourceType,
};
use ledgerflow_engine::{CreateJobRequest, IngestionEngine, JobOutcome, MemoryConnector, MemoryRecordSink};
use ledgerflow_ledger::{verify_chain, ChainVerification};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::cli::{CliArgs, Command, IngestArgs};
use crate::file_source::{infer_schema, JsonlFileConnector};

#[derive(Serialize)]
struct RunReport {
    outcome: JobOutcome,
    chain_length: usize,
    verification: ChainVerification,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    load_dotenv();
    let args = CliArgs::parse();

    let config = match &args.config {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => EngineConfig::from_env().context("invalid engine configuration")?,
    };
    config.log_summary();

    match args.command {
        Command::Ingest(ingest) => run_ingest(config, ingest).await,
        Command::VerifyDemo { records } => run_verify_demo(config, records).await,
    }
}

/// Start the tick loop, wait for `job_id` to finish, stop the loop.
async fn drive(engine: &IngestionEngine, job_id: &str) -> Result<JobOutcome> {
    let done = engine.subscribe(job_id)?;
    engine.start();
    let outcome = done.wait().await;
    engine.shutdown().await;
    outcome.with_context(|| format!("job {job_id} vanished before finishing"))
}

async fn run_ingest(config: EngineConfig, args: IngestArgs) -> Result<()> {
    let path = args
        .file
        .canonicalize()
        .with_context(|| format!("cannot read {}", args.file.display()))?;
    let schema = infer_schema(&path, &args.key_fields).await?;

    let engine = IngestionEngine::builder(config)
        .connector(Arc::new(JsonlFileConnector))
        .build()?;

    let source_id = format!("file:{}", path.display());
    let source = DataSource::new(
        source_id.as_str(),
        path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_else(|| source_id.clone()),
        args.tenant.as_str(),
        ConnectionConfig::File(FileConnection {
            path: path.display().to_string(),
            format: "jsonl".into(),
        }),
        schema,
    );
    engine.register_data_source(source).await?;
    if !engine.test_connection(&source_id).await? {
        bail!("{} is not readable", path.display());
    }

    let job_config = JobConfig {
        batch_size: args.batch_size,
        dedup: DedupConfig {
            enabled: !args.key_fields.is_empty(),
            key_fields: args.key_fields.clone(),
            ..Default::default()
        },
        ..Default::default()
    };
    let job = engine
        .create_ingestion_job(
            CreateJobRequest::new(source_id.as_str(), args.tenant.as_str(), args.priority)
                .config(job_config)
                .created_by("cli"),
        )
        .await?;
    info!(job_id = %job.id, lane = %job.priority, "ingesting {}", path.display());

    let outcome = drive(&engine, &job.id).await?;
    let chain = engine.get_hash_chain(&args.tenant)?;
    let verification = engine.verify_hash_chain(&args.tenant)?;
    let failed = outcome.status != JobStatus::Completed;

    let report = RunReport {
        outcome,
        chain_length: chain.len(),
        verification,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    if failed {
        bail!(
            "job {} ended {}: {}",
            job.id,
            report.outcome.status,
            report.outcome.error.as_deref().unwrap_or("no error recorded")
        );
    }
    Ok(())
}

async fn run_verify_demo(config: EngineConfig, count: usize) -> Result<()> {
    const TENANT: &str = "demo";
    const SOURCE: &str = "demo-events";

    let records = (1..=count)
        .map(|i| {
            let kind = if i % 2 == 0 { "deposit" } else { "withdrawal" };
            json!({ "event_id": i, "kind": kind, "amount": i * 100 })
        })
        .collect();
    let connector = MemoryConnector::new(SourceType::AuditLog).with_records(SOURCE, records);
    let sink = Arc::new(MemoryRecordSink::new());
    let engine = IngestionEngine::builder(config)
        .connector(Arc::new(connector))
        .sink(sink.clone())
        .build()?;

    let schema = SourceSchema {
        fields: vec![
            FieldDef::new("event_id", FieldType::Integer).required(),
            FieldDef::new("kind", FieldType::String).required(),
            FieldDef::new("amount", FieldType::Integer),
        ],
        primary_key: vec!["event_id".into()],
        tenant_field: None,
    };
    engine
        .register_data_source(DataSource::new(
            SOURCE,
            "demo audit events",
            TENANT,
            ConnectionConfig::AuditLog(AuditLogConnection {
                stream: "demo".into(),
                since: None,
            }),
            schema,
        ))
        .await?;

    let job = engine
        .create_ingestion_job(CreateJobRequest::new(SOURCE, TENANT, Priority::High).created_by("cli"))
        .await?;
    let outcome = tokio::time::timeout(Duration::from_secs(30), drive(&engine, &job.id))
        .await
        .context("demo job timed out")??;
    if outcome.status != JobStatus::Completed {
        bail!("demo job ended {}: {:?}", outcome.status, outcome.error);
    }

    let chain = engine.get_hash_chain(TENANT)?;
    let hashes: Vec<String> = sink.for_tenant(TENANT).into_iter().map(|r| r.hash).collect();
    let intact = engine.verify_records(TENANT, &hashes)?;
    println!("chain of {} link(s), intact: {}", chain.len(), intact.valid);
    for link in &chain {
        println!("  #{:<3} {} <- {}", link.sequence, &link.link_hash[..16], &link.previous_hash[..16]);
    }

    if chain.len() < 2 {
        warn!("need at least two links to demonstrate tampering");
        return Ok(());
    }

    let mut tampered = chain.clone();
    tampered[1].record_hash = "f".repeat(64);
    let verification = verify_chain(&tampered);
    println!(
        "after rewriting link #1: valid={}, broken_at={:?}, reason={}",
        verification.valid,
        verification.broken_at,
        verification.reason.as_deref().unwrap_or("-")
    );

    let mut reordered = chain;
    reordered.swap(0, 1);
    let verification = verify_chain(&reordered);
    println!(
        "after swapping links #0 and #1: valid={}, broken_at={:?}",
        verification.valid, verification.broken_at
    );
    Ok(())
}
