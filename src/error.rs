//! Error types for metrc-harvest
//!
//! This module defines the error hierarchy for the entire crate.
//! All public APIs return `Result<T, Error>` where Error is defined here.

use thiserror::Error;

/// The main error type for metrc-harvest
#[derive(Error, Debug)]
pub enum Error {
    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid config value for '{field}': {message}")]
    InvalidConfigValue { field: String, message: String },

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    // ============================================================================
    // Transport Errors
    // ============================================================================
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Collection failed after {attempts} attempts: {cause}")]
    RetriesExhausted { attempts: u32, cause: String },

    #[error("Operation cancelled")]
    Cancelled,

    // ============================================================================
    // Collection Errors
    // ============================================================================
    #[error("Malformed page from '{endpoint}': {message}")]
    MalformedPage { endpoint: String, message: String },

    #[error("Collection '{tag}' failed: {source}")]
    Request {
        tag: String,
        #[source]
        source: Box<Error>,
    },

    // ============================================================================
    // Flattening Errors
    // ============================================================================
    #[error("Invalid table name '{name}': {message}")]
    InvalidTableName { name: String, message: String },

    // ============================================================================
    // Storage Errors
    // ============================================================================
    #[error("Storage error: {0}")]
    Storage(#[from] duckdb::Error),

    #[error("Materialization failed for table '{table}': {message}")]
    Materialize { table: String, message: String },

    // ============================================================================
    // I/O Errors
    // ============================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // ============================================================================
    // Generic Errors
    // ============================================================================
    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an HTTP status error
    pub fn http_status(status: u16, body: impl Into<String>) -> Self {
        Self::HttpStatus {
            status,
            body: body.into(),
        }
    }

    /// Create a malformed page error
    pub fn malformed_page(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedPage {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Wrap an error with the collection request it belongs to
    pub fn for_request(tag: impl Into<String>, source: Error) -> Self {
        Self::Request {
            tag: tag.into(),
            source: Box::new(source),
        }
    }

    /// Create a materialization error
    pub fn materialize(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Materialize {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(_) | Error::Timeout { .. } => true,
            Error::HttpStatus { status, .. } => is_retryable_status(*status),
            _ => false,
        }
    }

    /// Check if this error aborts the whole run rather than one request
    pub fn is_run_fatal(&self) -> bool {
        matches!(self, Error::Storage(_) | Error::Materialize { .. })
    }
}

/// Check if an HTTP status code is retryable
pub(crate) fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

/// Result type alias for metrc-harvest
pub type Result<T> = std::result::Result<T, Error>;
