//! quake-unify - Multi-agency earthquake deduplication pipeline.
//!
//! Ingests earthquake reports from several seismological agencies,
//! normalizes them to a common schema, and merges independent reports of
//! the same physical event into a single unified record.

use std::io;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::error;

mod cli;
mod client;
mod config;
mod dedup;
mod errors;
mod filters;
mod models;
mod parsers;
mod pipeline;
mod region;
mod server;
mod store;

use cli::{Cli, Command, DedupArgs, IngestArgs, ServeArgs};
use config::SourceConfig;
use models::Source;
use server::{AppState, ServerConfig};
use store::{InMemoryAuditStore, InMemoryDeadLetterStore, InMemoryRawEventStore, InMemoryUnifiedStore};

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.quiet);

    match cli.command {
        Command::Ingest(args) => cmd_ingest(args),
        Command::Dedup(args) => cmd_dedup(args),
        Command::Serve(args) => cmd_serve(args),
    }
}

/// Initialize tracing subscriber.
fn init_tracing(verbose: bool, quiet: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn tokio_runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().context("failed to start async runtime")
}

/// Execute the `ingest` command: one ingestion cycle for a single source,
/// printed as the same JSON body the `/ingest` route returns.
fn cmd_ingest(args: IngestArgs) -> Result<()> {
    let runtime = tokio_runtime()?;
    runtime.block_on(async {
        let http = client::build_http_client().context("failed to build HTTP client")?;
        let config = SourceConfig::default_for(args.source);

        let raw_sink: Arc<dyn store::RawEventSink> = Arc::new(InMemoryRawEventStore::new());
        let dead_letter_sink: Arc<dyn store::DeadLetterSink> = Arc::new(InMemoryDeadLetterStore::new());
        let audit_sink: Arc<dyn store::AuditSink> = Arc::new(InMemoryAuditStore::new());

        let report = pipeline::run_source_pipeline(
            args.source,
            &http,
            &config,
            &raw_sink,
            &dead_letter_sink,
            &audit_sink,
        )
        .await
        .context("ingestion run failed")?;

        println!("{}", serde_json::to_string_pretty(&report)?);
        Ok(())
    })
}

/// Execute the `dedup` command: one dedup pass over an (empty, in-process)
/// raw store. A real deployment wires `cmd_ingest`/`cmd_dedup` against a
/// shared persistent store via `serve` instead of running them standalone.
fn cmd_dedup(args: DedupArgs) -> Result<()> {
    let runtime = tokio_runtime()?;
    runtime.block_on(async {
        let raw_sink: Arc<dyn store::RawEventSink> = Arc::new(InMemoryRawEventStore::new());
        let unified_store: Arc<dyn store::UnifiedStore> = Arc::new(InMemoryUnifiedStore::new());

        let report = dedup::run_dedup_pass(args.lookback_hours, &raw_sink, &unified_store)
            .await
            .context("dedup pass failed")?;

        println!("{}", serde_json::to_string_pretty(&report)?);
        Ok(())
    })
}

/// Execute the `serve` command: start the HTTP trigger surface.
fn cmd_serve(args: ServeArgs) -> Result<()> {
    let runtime = tokio_runtime()?;
    runtime.block_on(async {
        let http = client::build_http_client().context("failed to build HTTP client")?;

        let raw_sink: Arc<dyn store::RawEventSink> = Arc::new(InMemoryRawEventStore::new());
        let dead_letter_sink: Arc<dyn store::DeadLetterSink> = Arc::new(InMemoryDeadLetterStore::new());
        let audit_sink: Arc<dyn store::AuditSink> = Arc::new(InMemoryAuditStore::new());
        let unified_store: Arc<dyn store::UnifiedStore> = Arc::new(InMemoryUnifiedStore::new());

        let source_name = std::env::var("SOURCE_NAME")
            .ok()
            .and_then(|s| s.parse::<Source>().ok());

        let state = AppState::new(
            http,
            raw_sink,
            dead_letter_sink,
            audit_sink,
            unified_store,
            source_name,
        );

        let config = ServerConfig {
            port: args.port,
            host: args.host,
            source_name,
        };

        server::run_server(config, state)
            .await
            .context("server terminated")
    })
}
