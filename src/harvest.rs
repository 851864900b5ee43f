//! End-to-end harvest orchestration
//!
//! Wires the parallel collector into the flattening engine and the
//! DuckDB materializer. The merged record stream is consumed by a single
//! loop, so all schema evolution and table writes are serialized while
//! page fetching stays concurrent underneath.

use crate::collect::{CollectionEvent, CollectionSummary, Collector, CollectorConfig, RequestTag};
use crate::error::{Error, Result};
use crate::flatten::{FlatRow, FlattenConfig, Flattener};
use crate::http::HttpClient;
use crate::pagination::CollectionRequest;
use crate::plan::CollectionPlan;
use crate::store::{Materializer, TableSummary};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

/// Outcome of one harvest run
#[derive(Debug)]
pub struct HarvestReport {
    /// Records pulled off the merged stream
    pub records: u64,
    /// Fatal per-request failures, tagged by request
    pub failures: Vec<(RequestTag, Error)>,
    /// Every materialized table with its row count and columns
    pub tables: Vec<TableSummary>,
    /// Human-readable schema dump with inferred relationships
    pub schema_report: String,
}

impl HarvestReport {
    /// Whether every request completed cleanly
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// One configured harvest run
pub struct Harvest {
    client: HttpClient,
    requests: Vec<CollectionRequest>,
    collector_config: CollectorConfig,
    flatten_config: FlattenConfig,
}

impl Harvest {
    /// Create a run over the given requests
    pub fn new(client: HttpClient, requests: Vec<CollectionRequest>) -> Self {
        Self {
            client,
            requests,
            collector_config: CollectorConfig::default(),
            flatten_config: FlattenConfig::default(),
        }
    }

    /// Build a run from a plan file, resolving the token from the
    /// environment when the plan names one
    pub fn from_plan(plan: &CollectionPlan) -> Result<Self> {
        let client = HttpClient::new(plan.client_config()?);
        Ok(Self {
            client,
            requests: plan.collections.clone(),
            collector_config: plan.collector_config(),
            flatten_config: FlattenConfig::default(),
        })
    }

    /// Set the collector configuration
    #[must_use]
    pub fn with_collector_config(mut self, config: CollectorConfig) -> Self {
        self.collector_config = config;
        self
    }

    /// Set the flattening configuration
    #[must_use]
    pub fn with_flatten_config(mut self, config: FlattenConfig) -> Self {
        self.flatten_config = config;
        self
    }

    /// Run the harvest into a database file
    pub async fn into_database(self, path: impl AsRef<Path>) -> Result<HarvestReport> {
        let mut store = Materializer::open(path)?;
        self.run(&mut store).await
    }

    /// Run the harvest into an in-memory database, returning it for
    /// further queries
    pub async fn into_memory(self) -> Result<(HarvestReport, Materializer)> {
        let mut store = Materializer::open_in_memory()?;
        let report = self.run(&mut store).await?;
        Ok((report, store))
    }

    /// Drain the merged stream into memory without materializing
    pub async fn collect_raw(self) -> CollectionSummary {
        let collector = Collector::new(self.client).with_config(self.collector_config);
        collector.run(self.requests).collect_all().await
    }

    /// Consume the merged stream, flattening and materializing each
    /// record as it arrives.
    ///
    /// Per-request failures are reported in the returned summary without
    /// aborting siblings; a storage failure cancels the run immediately
    /// and propagates, since no partial-success story can be told for a
    /// broken database.
    pub async fn run(self, store: &mut Materializer) -> Result<HarvestReport> {
        let roots: Vec<String> = self
            .requests
            .iter()
            .map(|request| root_table_for(&request.endpoint))
            .collect();

        let collector = Collector::new(self.client).with_config(self.collector_config);
        let mut flattener = Flattener::with_config(self.flatten_config);
        let mut stream = collector.run(self.requests);

        let mut records: u64 = 0;
        let mut failures: Vec<(RequestTag, Error)> = Vec::new();
        let mut poisoned: std::collections::HashSet<usize> = std::collections::HashSet::new();

        while let Some(event) = stream.next().await {
            match event {
                CollectionEvent::Record { tag, record } => {
                    if poisoned.contains(&tag.index) {
                        continue;
                    }
                    let root = &roots[tag.index];
                    let rows = match flattener.flatten(record, root) {
                        Ok(rows) => rows,
                        Err(e) => {
                            // A record the engine cannot decompose poisons
                            // its request, not the run.
                            warn!("{tag}: dropping request: {e}");
                            poisoned.insert(tag.index);
                            failures.push((tag.clone(), Error::for_request(tag.label, e)));
                            continue;
                        }
                    };
                    if let Err(e) = materialize(store, &flattener, rows) {
                        stream.cancel();
                        return Err(e);
                    }
                    records += 1;
                }
                CollectionEvent::RequestFailed { tag, error } => {
                    failures.push((tag, error));
                }
                CollectionEvent::RequestFinished { tag, records: count } => {
                    info!("{tag}: complete, {count} record(s)");
                }
            }
        }

        let tables = store.table_summaries()?;
        let schema_report = store.schema_report()?;
        for table in &tables {
            info!("table {}: {} row(s)", table.name, table.rows);
        }

        Ok(HarvestReport {
            records,
            failures,
            tables,
            schema_report,
        })
    }
}

impl std::fmt::Debug for Harvest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Harvest")
            .field("requests", &self.requests.len())
            .finish_non_exhaustive()
    }
}

/// Write one record's rows, grouped per table so each schema is ensured
/// once per batch
fn materialize(store: &mut Materializer, flattener: &Flattener, rows: Vec<FlatRow>) -> Result<()> {
    let mut by_table: BTreeMap<String, Vec<FlatRow>> = BTreeMap::new();
    for row in rows {
        by_table.entry(row.table.clone()).or_default().push(row);
    }
    for (table, rows) in by_table {
        let schema = flattener
            .schema(&table)
            .cloned()
            .ok_or_else(|| Error::materialize(&table, "no schema for flattened rows"))?;
        store.append_rows(&schema, &rows)?;
    }
    Ok(())
}

/// Derive the root table name from an endpoint path.
///
/// Version segments are dropped, the rest joins with underscores:
/// `/v2/packages/active` becomes `packages_active`.
fn root_table_for(endpoint: &str) -> String {
    let joined: Vec<&str> = endpoint
        .split('/')
        .filter(|segment| !segment.is_empty())
        .filter(|segment| {
            !(segment.len() >= 2
                && segment.starts_with('v')
                && segment[1..].chars().all(|c| c.is_ascii_digit()))
        })
        .collect();
    if joined.is_empty() {
        "records".to_string()
    } else {
        joined.join("_")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_table_for() {
        assert_eq!(root_table_for("/v2/packages"), "packages");
        assert_eq!(root_table_for("/v2/packages/active"), "packages_active");
        assert_eq!(root_table_for("/items"), "items");
        assert_eq!(root_table_for("/v2/"), "records");
        assert_eq!(root_table_for("/v10/transfers"), "transfers");
        // Not a version segment.
        assert_eq!(root_table_for("/vault/items"), "vault_items");
    }
}
