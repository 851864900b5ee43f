//! Parallel collection module
//!
//! Fans one or more `CollectionRequest`s out across a bounded worker pool
//! and merges their records into a single back-pressured stream.
//!
//! # Overview
//!
//! Each request is driven by its own task. When the upstream reports a
//! total count, the remaining pages are prefetched concurrently and
//! reassembled in page order; otherwise pages are walked sequentially.
//! One global semaphore bounds in-flight page fetches across the whole
//! run, and the shared rate limiter caps the request rate underneath.
//!
//! Failure of one request never aborts its siblings unless fail-fast is
//! configured, in which case the run's cancellation token stops all
//! outstanding work cooperatively.

mod collector;
mod types;

pub use collector::{Collector, RecordStream};
pub use types::{CollectionEvent, CollectionSummary, CollectorConfig, RequestTag};

#[cfg(test)]
mod tests;
