//! Storage module
//!
//! Materializes flattened rows into DuckDB. Tables and columns are
//! created on demand and only ever grow: missing columns are added,
//! conflicting column types are widened in place, nothing is dropped.

mod materializer;

pub use materializer::{Materializer, TableSummary};

#[cfg(test)]
mod tests;
