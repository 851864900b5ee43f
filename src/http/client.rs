//! Retrying HTTP client
//!
//! Performs one logical request as a series of physical attempts:
//! - every attempt (retries included) first waits on the shared rate limiter
//! - network errors, timeouts, 429 and 5xx retry with backoff + jitter
//! - other 4xx are fatal and returned immediately
//! - exhausting the policy surfaces a terminal error carrying the last cause

use super::rate_limit::{RateBudget, RateLimiter};
use crate::error::{Error, Result};
use crate::types::{BackoffType, JsonValue, StringMap};
use reqwest::{Client, Response, StatusCode};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Retry policy for transient failures
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of physical attempts (including the first)
    pub max_attempts: u32,
    /// Base delay before the first retry
    pub base_delay: Duration,
    /// Backoff multiplier between consecutive retries
    pub multiplier: f64,
    /// Cap applied to any single delay
    pub max_delay: Duration,
    /// Backoff shape
    pub backoff: BackoffType,
    /// Add up to ±25% random jitter to each delay
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            backoff: BackoffType::Exponential,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay to sleep after `attempt` failed attempts (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let raw = match self.backoff {
            BackoffType::Constant => base_ms,
            BackoffType::Linear => base_ms * f64::from(attempt),
            BackoffType::Exponential => base_ms * self.multiplier.powi(attempt as i32 - 1),
        };
        let capped = raw.min(self.max_delay.as_millis() as f64);

        let delay_ms = if self.jitter {
            let jitter_range = capped * 0.25;
            let jitter = (rand_simple() * jitter_range * 2.0) - jitter_range;
            (capped + jitter).max(0.0)
        } else {
            capped
        };

        Duration::from_millis(delay_ms as u64)
    }
}

/// Simple pseudo-random number generator for jitter.
/// Returns a value between 0.0 and 1.0.
fn rand_simple() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (f64::from(nanos) / f64::from(u32::MAX)).fract()
}

/// Configuration for the HTTP client
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Base URL of the API server
    pub base_url: String,
    /// Per-attempt request timeout
    pub timeout: Duration,
    /// Default headers attached to every request. The authentication
    /// collaborator puts the bearer token here; this crate never sees
    /// credentials.
    pub default_headers: StringMap,
    /// User agent string
    pub user_agent: String,
    /// Retry policy
    pub retry: RetryPolicy,
    /// Rate budget shared by all requests issued through this client
    pub rate: RateBudget,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            timeout: Duration::from_secs(30),
            default_headers: StringMap::new(),
            user_agent: format!("metrc-harvest/{}", env!("CARGO_PKG_VERSION")),
            retry: RetryPolicy::default(),
            rate: RateBudget::default(),
        }
    }
}

impl HttpClientConfig {
    /// Create a new config builder
    pub fn builder() -> HttpClientConfigBuilder {
        HttpClientConfigBuilder::default()
    }
}

/// Builder for HTTP client config
#[derive(Default)]
pub struct HttpClientConfigBuilder {
    config: HttpClientConfig,
}

impl HttpClientConfigBuilder {
    /// Set the base URL
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = url.into();
        self
    }

    /// Set the per-attempt timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Add a default header
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.default_headers.insert(key.into(), value.into());
        self
    }

    /// Attach a bearer token to every request
    pub fn bearer_token(self, token: impl AsRef<str>) -> Self {
        let value = format!("Bearer {}", token.as_ref());
        self.header("Authorization", value)
    }

    /// Set the retry policy
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.config.retry = retry;
        self
    }

    /// Set the rate budget
    pub fn rate(mut self, rate: RateBudget) -> Self {
        self.config.rate = rate;
        self
    }

    /// Set user agent
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.config.user_agent = agent.into();
        self
    }

    /// Build the config
    pub fn build(self) -> HttpClientConfig {
        self.config
    }
}

/// HTTP client with retry and shared rate limiting.
///
/// Cloning is cheap and shares the rate limiter, so every worker of a run
/// stays under one system-wide ceiling.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    config: HttpClientConfig,
    limiter: RateLimiter,
    cancel: CancellationToken,
}

impl HttpClient {
    /// Create a new HTTP client with the given configuration
    pub fn new(config: HttpClientConfig) -> Self {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .expect("Failed to build HTTP client");

        let limiter = RateLimiter::new(config.rate);

        Self {
            client,
            config,
            limiter,
            cancel: CancellationToken::new(),
        }
    }

    /// Replace the cancellation token; the rate limiter stays shared
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// The shared rate limiter
    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// The cancellation token observed before every attempt
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Fetch `path` with `query`, returning the parsed JSON body.
    ///
    /// This is one logical operation: transient failures are absorbed by
    /// the retry policy and are invisible to the caller unless attempts
    /// are exhausted.
    pub async fn get_json(&self, path: &str, query: &StringMap) -> Result<JsonValue> {
        let response = self.get(path, query).await?;
        let body: JsonValue = response.json().await.map_err(Error::Http)?;
        Ok(body)
    }

    /// Fetch `path` with `query`, retrying per policy
    pub async fn get(&self, path: &str, query: &StringMap) -> Result<Response> {
        let url = self.build_url(path);
        let policy = &self.config.retry;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            // Admission first, then the attempt. Retries go through the
            // limiter again, so backoff never lets a burst sneak past the
            // ceiling.
            self.wait_for_slot().await?;

            match self.send_once(&url, query).await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        debug!("GET {url} succeeded on attempt {attempt}");
                        return Ok(response);
                    }

                    if status != StatusCode::TOO_MANY_REQUESTS && !status.is_server_error() {
                        let body = response.text().await.unwrap_or_default();
                        return Err(Error::http_status(status.as_u16(), body));
                    }

                    // 429 or 5xx
                    if attempt >= policy.max_attempts {
                        return Err(Error::RetriesExhausted {
                            attempts: attempt,
                            cause: format!("HTTP {}", status.as_u16()),
                        });
                    }

                    let mut delay = policy.delay_for(attempt);
                    if status == StatusCode::TOO_MANY_REQUESTS {
                        if let Some(retry_after) = extract_retry_after(&response) {
                            delay = delay.max(Duration::from_secs(retry_after));
                        }
                    }
                    warn!(
                        "GET {url} returned {}, attempt {attempt}/{}, retrying in {delay:?}",
                        status.as_u16(),
                        policy.max_attempts
                    );
                    self.backoff(delay).await?;
                }
                Err(e) => {
                    let retryable = e.is_timeout() || e.is_connect();
                    let cause = if e.is_timeout() {
                        Error::Timeout {
                            timeout_ms: self.config.timeout.as_millis() as u64,
                        }
                    } else {
                        Error::Http(e)
                    };

                    if !retryable {
                        return Err(cause);
                    }
                    if attempt >= policy.max_attempts {
                        return Err(Error::RetriesExhausted {
                            attempts: attempt,
                            cause: cause.to_string(),
                        });
                    }

                    let delay = policy.delay_for(attempt);
                    warn!(
                        "GET {url} failed ({cause}), attempt {attempt}/{}, retrying in {delay:?}",
                        policy.max_attempts
                    );
                    self.backoff(delay).await?;
                }
            }
        }
    }

    /// Wait on the rate limiter, bailing out if the run was cancelled
    async fn wait_for_slot(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        tokio::select! {
            () = self.cancel.cancelled() => Err(Error::Cancelled),
            () = self.limiter.acquire() => Ok(()),
        }
    }

    /// Sleep between attempts, bailing out if the run was cancelled
    async fn backoff(&self, delay: Duration) -> Result<()> {
        tokio::select! {
            () = self.cancel.cancelled() => Err(Error::Cancelled),
            () = tokio::time::sleep(delay) => Ok(()),
        }
    }

    async fn send_once(
        &self,
        url: &str,
        query: &StringMap,
    ) -> std::result::Result<Response, reqwest::Error> {
        let mut req = self.client.get(url);
        for (key, value) in &self.config.default_headers {
            req = req.header(key.as_str(), value.as_str());
        }
        if !query.is_empty() {
            req = req.query(query);
        }
        req.send().await
    }

    /// Build full URL from path
    fn build_url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }

        let base = self.config.base_url.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        format!("{base}/{path}")
    }
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("base_url", &self.config.base_url)
            .field("retry", &self.config.retry)
            .field("rate", &self.config.rate)
            .finish_non_exhaustive()
    }
}

/// Extract retry-after header value in seconds
fn extract_retry_after(response: &Response) -> Option<u64> {
    response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse().ok())
}
