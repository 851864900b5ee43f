//! CLI commands and argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// metrc-harvest CLI
#[derive(Parser, Debug)]
#[command(name = "metrc-harvest")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Harvest collections into a DuckDB database
    Collect {
        /// Plan file (YAML). Either this or --endpoint is required.
        #[arg(short, long)]
        plan: Option<PathBuf>,

        /// Single endpoint to harvest (e.g. /v2/packages/active)
        #[arg(long, conflicts_with = "plan", requires = "license")]
        endpoint: Option<String>,

        /// License number for --endpoint mode
        #[arg(long)]
        license: Option<String>,

        /// Base URL for --endpoint mode
        #[arg(long, default_value = "https://api.trackandtrace.tools")]
        base_url: String,

        /// Environment variable holding the bearer token
        #[arg(long, default_value = "T3_ACCESS_TOKEN")]
        token_env: String,

        /// Records per page for --endpoint mode
        #[arg(long, default_value = "100")]
        page_size: u32,

        /// Stop after this many records per collection
        #[arg(long)]
        max_items: Option<u64>,

        /// Concurrent page fetches
        #[arg(long)]
        workers: Option<usize>,

        /// Requests per second ceiling
        #[arg(long)]
        rps: Option<u32>,

        /// Cancel everything on the first fatal failure
        #[arg(long)]
        fail_fast: bool,

        /// Output database file
        #[arg(short, long, default_value = "harvest.duckdb")]
        output: PathBuf,
    },

    /// Print the schema report of an existing database
    Schema {
        /// Database file
        database: PathBuf,
    },

    /// Check a plan file without running it
    Validate {
        /// Plan file (YAML)
        plan: PathBuf,
    },
}
