//! Collection plan files
//!
//! A plan is a small YAML document describing one harvest run: the API
//! host, rate/retry budgets, worker count, and the collections to walk.
//! Credentials never live in the file; the plan only names the
//! environment variable the bearer token arrives in.
//!
//! ```yaml
//! base_url: https://api.trackandtrace.tools
//! token_env: T3_ACCESS_TOKEN
//! rate:
//!   requests_per_second: 5
//!   burst: 5
//! workers: 4
//! collections:
//!   - endpoint: /v2/packages/active
//!     license_number: CUL00001
//!     page_size: 100
//!   - endpoint: /v2/transfers/incoming
//!     license_number: CUL00001
//! ```

use crate::collect::CollectorConfig;
use crate::error::{Error, Result};
use crate::http::{HttpClientConfig, RateBudget, RetryPolicy};
use crate::pagination::CollectionRequest;
use crate::types::{BackoffType, FailureMode};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

fn default_workers() -> usize {
    4
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_true() -> bool {
    true
}

/// Serializable retry tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct RetryDefinition {
    /// Maximum physical attempts per request
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay before the first retry, in milliseconds
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Backoff multiplier
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Cap on any single delay, in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Whether delays carry random jitter
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryDefinition {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_true(),
        }
    }
}

impl From<&RetryDefinition> for RetryPolicy {
    fn from(def: &RetryDefinition) -> Self {
        RetryPolicy {
            max_attempts: def.max_attempts,
            base_delay: Duration::from_millis(def.base_delay_ms),
            multiplier: def.multiplier,
            max_delay: Duration::from_millis(def.max_delay_ms),
            backoff: BackoffType::Exponential,
            jitter: def.jitter,
        }
    }
}

/// Top-level harvest plan
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct CollectionPlan {
    /// Base URL of the API server
    pub base_url: String,
    /// Environment variable holding the bearer token
    #[serde(default)]
    pub token_env: Option<String>,
    /// Request rate budget
    #[serde(default)]
    pub rate: RateBudget,
    /// Retry tuning
    #[serde(default)]
    pub retry: RetryDefinition,
    /// Concurrent page fetches
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Cancel the whole run on the first fatal failure
    #[serde(default)]
    pub fail_fast: bool,
    /// Collections to harvest
    pub collections: Vec<CollectionRequest>,
}

impl CollectionPlan {
    /// Load a plan from a YAML file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_str(&text)
    }

    /// Parse a plan from YAML text
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(text: &str) -> Result<Self> {
        let plan: CollectionPlan = serde_yaml::from_str(text)?;
        plan.validate()?;
        Ok(plan)
    }

    /// Check the plan for values that cannot work
    pub fn validate(&self) -> Result<()> {
        if self.base_url.is_empty() {
            return Err(Error::InvalidConfigValue {
                field: "base_url".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        if self.collections.is_empty() {
            return Err(Error::InvalidConfigValue {
                field: "collections".to_string(),
                message: "at least one collection is required".to_string(),
            });
        }
        if self.rate.requests_per_second == 0 {
            return Err(Error::InvalidConfigValue {
                field: "rate.requests_per_second".to_string(),
                message: "must be positive".to_string(),
            });
        }
        for collection in &self.collections {
            if collection.page_size == 0 {
                return Err(Error::InvalidConfigValue {
                    field: "collections.page_size".to_string(),
                    message: format!("must be positive for {}", collection.tag()),
                });
            }
        }
        Ok(())
    }

    /// Build the transport config, resolving the token from the
    /// environment when the plan names one
    pub fn client_config(&self) -> Result<HttpClientConfig> {
        let mut builder = HttpClientConfig::builder()
            .base_url(&self.base_url)
            .retry(RetryPolicy::from(&self.retry))
            .rate(self.rate);

        if let Some(var) = &self.token_env {
            let token = std::env::var(var).map_err(|_| Error::InvalidConfigValue {
                field: "token_env".to_string(),
                message: format!("environment variable {var} is not set"),
            })?;
            builder = builder.bearer_token(token);
        }

        Ok(builder.build())
    }

    /// Build the collector config
    pub fn collector_config(&self) -> CollectorConfig {
        let mut config = CollectorConfig::new(self.workers);
        if self.fail_fast {
            config.failure_mode = FailureMode::FailFast;
        }
        config
    }
}
