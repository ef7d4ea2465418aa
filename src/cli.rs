//! Command-line interface definitions.
//!
//! Uses clap derive API for argument parsing.

use clap::{Parser, Subcommand};

use crate::dedup::DEFAULT_LOOKBACK_HOURS;
use crate::models::Source;

/// Unify multi-agency earthquake reports into a deduplicated event stream.
#[derive(Parser, Debug)]
#[command(name = "quake-unify")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Command to run
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose debug logging
    #[arg(long, global = true)]
    pub verbose: bool,

    /// Suppress all output except errors
    #[arg(long, global = true)]
    pub quiet: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run one ingestion cycle for a single source and print the run report.
    Ingest(IngestArgs),

    /// Run one dedup pass over the raw store and print the dedup report.
    Dedup(DedupArgs),

    /// Start the HTTP trigger surface (`/ingest`, `/deduplicate`, `/health`).
    Serve(ServeArgs),
}

/// Arguments for the `ingest` command.
#[derive(Parser, Debug)]
pub struct IngestArgs {
    /// Source agency to fetch from
    #[arg(long, value_parser = parse_source)]
    pub source: Source,
}

/// Arguments for the `dedup` command.
#[derive(Parser, Debug)]
pub struct DedupArgs {
    /// Lookback window, in hours, to load from the raw store
    #[arg(long, default_value_t = DEFAULT_LOOKBACK_HOURS)]
    pub lookback_hours: i64,
}

/// Arguments for the `serve` command.
#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Port to listen on
    #[arg(long, short = 'p', default_value = "8080")]
    pub port: u16,

    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,
}

/// Parse a source name from string.
fn parse_source(s: &str) -> Result<Source, String> {
    s.parse()
}
