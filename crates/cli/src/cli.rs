use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use ledgerflow_core::Priority;

/// Tamper-evident multi-tenant ingestion.
///
/// Runs records through the validation and quality pipeline, seals every
/// accepted record into its tenant's hash chain and reports the chain state.
#[derive(Parser, Debug)]
#[command(name = "ledgerflow", version, about = "Tamper-evident multi-tenant ingestion")]
pub struct CliArgs {
    /// Engine config file (TOML). Environment overrides still apply.
    #[arg(long, global = true, env = "LEDGERFLOW_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Ingest a JSON-lines file for one tenant and print the chain verification.
    Ingest(IngestArgs),
    /// Ingest generated records, then show that tampering is detected.
    VerifyDemo {
        /// Number of records to generate.
        #[arg(long, default_value = "5")]
        records: usize,
    },
}

#[derive(Args, Debug)]
pub struct IngestArgs {
    /// JSON-lines input, one object per line.
    #[arg(long)]
    pub file: PathBuf,

    /// Owning tenant.
    #[arg(long)]
    pub tenant: String,

    /// Lane to admit the job into: critical, high, medium or low.
    #[arg(long, default_value = "medium", value_parser = parse_priority)]
    pub priority: Priority,

    /// Deduplicate on these fields (comma separated). Also used as the
    /// source's primary key.
    #[arg(long, value_delimiter = ',')]
    pub key_fields: Vec<String>,

    /// Records per progress flush.
    #[arg(long, default_value = "100")]
    pub batch_size: usize,
}

fn parse_priority(s: &str) -> Result<Priority, String> {
    Priority::from_lane_id(s).ok_or_else(|| format!("unknown priority '{s}' (critical, high, medium, low)"))
}
