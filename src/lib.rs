// Allow common clippy pedantic lints that aren't critical for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::needless_pass_by_value)]

//! # metrc-harvest
//!
//! Rate-limited parallel collection of paginated Metrc track-and-trace data
//! into DuckDB.
//!
//! The crate walks paginated collection endpoints of a Metrc-style
//! regulatory API behind a shared token-bucket rate limiter, fans page
//! fetches out across a bounded worker pool, then decomposes the deeply
//! nested, schema-drifting records into flat relational tables.
//!
//! ## Features
//!
//! - **Rate-Limited Transport**: one shared token bucket caps the
//!   system-wide request rate; every physical attempt (retries included)
//!   waits for admission
//! - **Retrying HTTP Client**: exponential backoff with jitter on network
//!   errors, 429 and 5xx; other 4xx fail immediately
//! - **Parallel Collection**: many licenses/endpoints harvested
//!   concurrently with back-pressure and per-request failure isolation
//! - **Adaptive Flattening**: nested objects and arrays become child tables
//!   with foreign keys; columns are inferred and widened, never dropped
//! - **DuckDB Materialization**: tables and columns created on demand,
//!   additive-only; schema report with inferred relationships
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use metrc_harvest::harvest::{Harvest, HarvestConfig};
//! use metrc_harvest::plan::CollectionPlan;
//!
//! #[tokio::main]
//! async fn main() -> metrc_harvest::Result<()> {
//!     let plan = CollectionPlan::from_path("plans/packages.yaml")?;
//!     let report = Harvest::from_plan(&plan)?
//!         .into_database("harvest.duckdb")
//!         .await?;
//!     println!("{}", report.schema_report);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                        Harvest Pipeline                        │
//! │  CollectionRequest → merged RecordStream → tables in DuckDB    │
//! └────────────────────────────────────────────────────────────────┘
//!                               │
//! ┌───────────┬───────────┬─────┴─────┬────────────┬──────────────┐
//! │   HTTP    │ Paginate  │  Collect  │  Flatten   │    Store     │
//! ├───────────┼───────────┼───────────┼────────────┼──────────────┤
//! │ Retry     │ page/     │ worker    │ child      │ DuckDB       │
//! │ Backoff   │ pageSize  │ pool      │ tables     │ add-only     │
//! │ Rate Limit│ total/cap │ channel   │ widening   │ columns      │
//! └───────────┴───────────┴───────────┴────────────┴──────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(missing_docs)]

// ============================================================================
// Module declarations
// ============================================================================

/// Error types for the crate
pub mod error;

/// Common types and type aliases
pub mod types;

/// HTTP client with retry and rate limiting
pub mod http;

/// Paginated endpoint walking
pub mod pagination;

/// Parallel collection across a bounded worker pool
pub mod collect;

/// Nested record flattening into relational rows
pub mod flatten;

/// DuckDB table materialization
pub mod store;

/// Collection plan files (YAML)
pub mod plan;

/// End-to-end harvest orchestration
pub mod harvest;

/// Command-line interface
pub mod cli;

// ============================================================================
// Re-exports
// ============================================================================

pub use error::{Error, Result};
pub use types::*;

pub use collect::{CollectionEvent, Collector, RequestTag};
pub use pagination::{CollectionRequest, Page, PageWalker};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
