//! Common types used throughout metrc-harvest
//!
//! This module contains shared type definitions, type aliases,
//! and utility types used across multiple modules.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// Type Aliases
// ============================================================================

/// JSON value type (re-exported from serde_json)
pub type JsonValue = serde_json::Value;

/// JSON object type
pub type JsonObject = serde_json::Map<String, JsonValue>;

/// A raw collection record as returned by the upstream API.
///
/// Records are schema-on-read: fields appear, disappear, and change type
/// between records of the same logical entity over time.
pub type RawRecord = JsonObject;

/// Generic key-value map with string keys and values
pub type StringMap = HashMap<String, String>;

// ============================================================================
// Backoff Type
// ============================================================================

/// Type of backoff for retries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffType {
    /// Constant delay between retries
    Constant,
    /// Linear increase in delay
    Linear,
    /// Exponential increase in delay
    #[default]
    Exponential,
}

// ============================================================================
// Filter Logic
// ============================================================================

/// How collection filters combine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterLogic {
    /// All filters must match
    #[default]
    And,
    /// Any filter may match
    Or,
}

impl std::fmt::Display for FilterLogic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FilterLogic::And => write!(f, "and"),
            FilterLogic::Or => write!(f, "or"),
        }
    }
}

// ============================================================================
// Failure Mode
// ============================================================================

/// How the collector reacts to a fatal per-request failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    /// Report the failed request, keep siblings running
    #[default]
    Isolate,
    /// Cancel all outstanding work on the first fatal failure
    FailFast,
}

// ============================================================================
// Utilities
// ============================================================================

/// Extension trait for Option<String> to handle empty strings
pub trait OptionStringExt {
    /// Returns None if the string is empty
    fn none_if_empty(self) -> Option<String>;
}

impl OptionStringExt for Option<String> {
    fn none_if_empty(self) -> Option<String> {
        self.filter(|s| !s.is_empty())
    }
}

impl OptionStringExt for String {
    fn none_if_empty(self) -> Option<String> {
        if self.is_empty() {
            None
        } else {
            Some(self)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_type_serde() {
        let backoff: BackoffType = serde_json::from_str("\"exponential\"").unwrap();
        assert_eq!(backoff, BackoffType::Exponential);

        let json = serde_json::to_string(&BackoffType::Constant).unwrap();
        assert_eq!(json, "\"constant\"");
    }

    #[test]
    fn test_filter_logic_display() {
        assert_eq!(FilterLogic::And.to_string(), "and");
        assert_eq!(FilterLogic::Or.to_string(), "or");
        assert_eq!(FilterLogic::default(), FilterLogic::And);
    }

    #[test]
    fn test_failure_mode_serde() {
        let mode: FailureMode = serde_json::from_str("\"fail_fast\"").unwrap();
        assert_eq!(mode, FailureMode::FailFast);
        assert_eq!(FailureMode::default(), FailureMode::Isolate);
    }

    #[test]
    fn test_option_string_none_if_empty() {
        assert_eq!(
            Some("test".to_string()).none_if_empty(),
            Some("test".to_string())
        );
        assert_eq!(Some(String::new()).none_if_empty(), None);
        assert_eq!(None::<String>.none_if_empty(), None);
        assert_eq!("test".to_string().none_if_empty(), Some("test".to_string()));
        assert_eq!(String::new().none_if_empty(), None);
    }
}
