//! Collector types

use crate::error::Error;
use crate::types::{FailureMode, RawRecord};

/// Identifies which `CollectionRequest` an event belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestTag {
    /// Position of the request in the submitted batch
    pub index: usize,
    /// Human-readable request label ("endpoint license")
    pub label: String,
}

impl std::fmt::Display for RequestTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label)
    }
}

/// One event on the merged output stream
#[derive(Debug)]
pub enum CollectionEvent {
    /// One raw record, in per-request page order
    Record {
        /// The request it came from
        tag: RequestTag,
        /// The record itself
        record: RawRecord,
    },
    /// A request completed cleanly
    RequestFinished {
        /// The request that finished
        tag: RequestTag,
        /// Records it produced
        records: u64,
    },
    /// A request failed fatally
    RequestFailed {
        /// The request that failed
        tag: RequestTag,
        /// The terminal error
        error: Error,
    },
}

impl CollectionEvent {
    /// The tag of the request this event belongs to
    pub fn tag(&self) -> &RequestTag {
        match self {
            CollectionEvent::Record { tag, .. }
            | CollectionEvent::RequestFinished { tag, .. }
            | CollectionEvent::RequestFailed { tag, .. } => tag,
        }
    }

    /// Check if this is a record event
    pub fn is_record(&self) -> bool {
        matches!(self, CollectionEvent::Record { .. })
    }
}

/// Configuration for the parallel collector
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Maximum concurrent page fetches across the whole run
    pub workers: usize,
    /// Output channel capacity, in records (back-pressure bound)
    pub buffer: usize,
    /// Reaction to a fatal per-request failure
    pub failure_mode: FailureMode,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            buffer: 256,
            failure_mode: FailureMode::Isolate,
        }
    }
}

impl CollectorConfig {
    /// Create a config with the given worker pool size
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
            ..Self::default()
        }
    }

    /// Set the output buffer capacity
    #[must_use]
    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer.max(1);
        self
    }

    /// Cancel all outstanding work on the first fatal failure
    #[must_use]
    pub fn fail_fast(mut self) -> Self {
        self.failure_mode = FailureMode::FailFast;
        self
    }
}

/// Outcome of draining a whole run into memory
#[derive(Debug, Default)]
pub struct CollectionSummary {
    /// All records, per-request order preserved
    pub records: Vec<RawRecord>,
    /// Fatal failures, tagged by request
    pub failures: Vec<(RequestTag, Error)>,
}

impl CollectionSummary {
    /// Whether every request completed cleanly
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}
