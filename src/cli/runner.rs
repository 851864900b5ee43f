//! CLI command execution

use super::commands::{Cli, Commands};
use crate::collect::CollectorConfig;
use crate::error::{Error, Result};
use crate::harvest::Harvest;
use crate::http::{HttpClient, HttpClientConfig, RateBudget};
use crate::pagination::CollectionRequest;
use crate::plan::CollectionPlan;
use crate::store::Materializer;
use crate::types::FailureMode;
use std::path::Path;
use tracing::info;

/// Executes parsed CLI commands
pub struct Runner {
    cli: Cli,
}

impl Runner {
    /// Create a runner for the parsed CLI
    pub fn new(cli: Cli) -> Self {
        Self { cli }
    }

    /// Dispatch the selected command
    pub async fn run(self) -> Result<()> {
        match self.cli.command {
            Commands::Collect {
                ref plan,
                ref endpoint,
                ref license,
                ref base_url,
                ref token_env,
                page_size,
                max_items,
                workers,
                rps,
                fail_fast,
                ref output,
            } => {
                let harvest = match (plan, endpoint) {
                    (Some(path), _) => {
                        let mut plan = CollectionPlan::from_path(path)?;
                        if let Some(workers) = workers {
                            plan.workers = workers;
                        }
                        if let Some(rps) = rps {
                            plan.rate = RateBudget::new(rps, rps);
                        }
                        if fail_fast {
                            plan.fail_fast = true;
                        }
                        Harvest::from_plan(&plan)?
                    }
                    (None, Some(endpoint)) => {
                        let license = license.as_ref().ok_or_else(|| {
                            Error::config("--license is required with --endpoint")
                        })?;
                        let mut request = CollectionRequest::new(endpoint, license)
                            .with_page_size(page_size);
                        if let Some(cap) = max_items {
                            request = request.with_max_items(cap);
                        }

                        let mut builder = HttpClientConfig::builder().base_url(base_url);
                        if let Some(rps) = rps {
                            builder = builder.rate(RateBudget::new(rps, rps));
                        }
                        if let Ok(token) = std::env::var(token_env) {
                            builder = builder.bearer_token(token);
                        }
                        let client = HttpClient::new(builder.build());

                        let mut config = CollectorConfig::new(workers.unwrap_or(4));
                        if fail_fast {
                            config.failure_mode = FailureMode::FailFast;
                        }
                        Harvest::new(client, vec![request]).with_collector_config(config)
                    }
                    (None, None) => {
                        return Err(Error::config("either --plan or --endpoint is required"))
                    }
                };

                run_collect(harvest, output).await
            }

            Commands::Schema { ref database } => {
                let store = Materializer::open(database)?;
                println!("{}", store.schema_report()?);
                Ok(())
            }

            Commands::Validate { ref plan } => {
                let plan = CollectionPlan::from_path(plan)?;
                println!(
                    "plan ok: {} collection(s) against {}",
                    plan.collections.len(),
                    plan.base_url
                );
                Ok(())
            }
        }
    }
}

async fn run_collect(harvest: Harvest, output: &Path) -> Result<()> {
    info!("harvesting into {}", output.display());
    let report = harvest.into_database(output).await?;

    println!(
        "{} record(s) across {} table(s)",
        report.records,
        report.tables.len()
    );
    for table in &report.tables {
        println!("  {}: {} row(s)", table.name, table.rows);
    }
    if !report.failures.is_empty() {
        println!();
        for (tag, error) in &report.failures {
            eprintln!("failed: {tag}: {error}");
        }
        return Err(Error::Other(format!(
            "{} of the requested collections failed",
            report.failures.len()
        )));
    }
    Ok(())
}
