//! CLI module
//!
//! Command-line interface for running harvests.
//!
//! # Commands
//!
//! - `collect` - Harvest collections into a DuckDB file
//! - `schema` - Print the schema report of an existing database
//! - `validate` - Check a plan file without running it

mod commands;
mod runner;

pub use commands::{Cli, Commands};
pub use runner::Runner;
