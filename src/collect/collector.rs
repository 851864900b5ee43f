//! Parallel collector implementation

use super::types::{CollectionEvent, CollectionSummary, CollectorConfig, RequestTag};
use crate::error::Result;
use crate::http::HttpClient;
use crate::pagination::{fetch_page, CollectionRequest, PageWalker};
use crate::types::{FailureMode, RawRecord};
use futures::stream::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Executes collection requests concurrently and merges their records.
///
/// Records from one request keep their upstream page order; interleaving
/// across requests is unspecified. The output channel is bounded, so
/// workers stop fetching when the consumer falls behind.
pub struct Collector {
    client: HttpClient,
    config: CollectorConfig,
}

impl Collector {
    /// Create a collector with default configuration
    pub fn new(client: HttpClient) -> Self {
        Self {
            client,
            config: CollectorConfig::default(),
        }
    }

    /// Set the collector configuration
    #[must_use]
    pub fn with_config(mut self, config: CollectorConfig) -> Self {
        self.config = config;
        self
    }

    /// Start the run, returning the merged event stream.
    ///
    /// The run owns a cancellation token; cancelling it (directly or via
    /// fail-fast) stops new page fetches and new retry attempts, while
    /// attempts already in flight finish or fail on their own.
    pub fn run(&self, requests: Vec<CollectionRequest>) -> RecordStream {
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(self.config.buffer);
        let fetch_slots = Arc::new(Semaphore::new(self.config.workers));

        info!(
            "starting collection run: {} request(s), {} worker(s)",
            requests.len(),
            self.config.workers
        );

        for (index, request) in requests.into_iter().enumerate() {
            let tag = RequestTag {
                index,
                label: request.tag(),
            };
            let client = self.client.clone().with_cancellation(cancel.child_token());
            let tx = tx.clone();
            let fetch_slots = Arc::clone(&fetch_slots);
            let run_cancel = cancel.clone();
            let failure_mode = self.config.failure_mode;
            let workers = self.config.workers;

            tokio::spawn(async move {
                match drive_request(&client, request, &tag, &tx, &fetch_slots, workers).await {
                    Ok(records) => {
                        debug!("{tag}: finished with {records} record(s)");
                        let _ = tx
                            .send(CollectionEvent::RequestFinished {
                                tag: tag.clone(),
                                records,
                            })
                            .await;
                    }
                    Err(error) => {
                        warn!("{tag}: failed: {error}");
                        if failure_mode == FailureMode::FailFast {
                            run_cancel.cancel();
                        }
                        let _ = tx
                            .send(CollectionEvent::RequestFailed {
                                tag: tag.clone(),
                                error,
                            })
                            .await;
                    }
                }
            });
        }

        // Workers hold the only remaining senders; the stream ends when
        // the last one finishes.
        drop(tx);

        RecordStream { rx, cancel }
    }
}

impl std::fmt::Debug for Collector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collector")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Drive one request to completion, sending records as pages land.
///
/// The first page is fetched alone: when it reports a total, the
/// remaining pages are prefetched concurrently and reassembled in page
/// order; otherwise the walk stays sequential.
async fn drive_request(
    client: &HttpClient,
    request: CollectionRequest,
    tag: &RequestTag,
    tx: &mpsc::Sender<CollectionEvent>,
    fetch_slots: &Arc<Semaphore>,
    workers: usize,
) -> Result<u64> {
    let mut sent: u64 = 0;
    let mut walker = PageWalker::new(client.clone(), request.clone());

    let first = {
        let _slot = fetch_slots.acquire().await.expect("semaphore closed");
        walker.next_page().await?
    };
    let Some(first) = first else {
        return Ok(0);
    };
    let total = first.total;
    let first_has_more = first.has_more;

    if !send_records(tx, tag, first.records, &mut sent).await {
        return Ok(sent);
    }
    if !first_has_more {
        return Ok(sent);
    }

    if let Some(total) = total {
        // Known total: prefetch pages 2..=N concurrently, reassembled in
        // page order by the buffered stream.
        let limit = request.max_items.map_or(total, |cap| cap.min(total));
        let page_size = u64::from(request.page_size.max(1));
        let num_pages = limit.div_ceil(page_size) as u32;

        let mut pages = futures::stream::iter(2..=num_pages)
            .map(|page| {
                let client = client.clone();
                let request = request.clone();
                let fetch_slots = Arc::clone(fetch_slots);
                async move {
                    let _slot = fetch_slots.acquire().await.expect("semaphore closed");
                    fetch_page(&client, &request, page).await
                }
            })
            .buffered(workers.max(1));

        while let Some(page) = pages.next().await {
            let mut page = page?;
            let remaining = limit.saturating_sub(sent);
            if page.records.len() as u64 >= remaining {
                page.records.truncate(remaining as usize);
            }
            if !send_records(tx, tag, page.records, &mut sent).await {
                return Ok(sent);
            }
            if sent >= limit {
                break;
            }
        }
    } else {
        // Unknown total: keep walking sequentially until exhaustion.
        loop {
            let page = {
                let _slot = fetch_slots.acquire().await.expect("semaphore closed");
                walker.next_page().await?
            };
            let Some(page) = page else { break };
            if !send_records(tx, tag, page.records, &mut sent).await {
                return Ok(sent);
            }
        }
    }

    Ok(sent)
}

/// Send a page's records downstream. Returns false when the consumer is
/// gone and the worker should stop quietly.
async fn send_records(
    tx: &mpsc::Sender<CollectionEvent>,
    tag: &RequestTag,
    records: Vec<RawRecord>,
    sent: &mut u64,
) -> bool {
    for record in records {
        let event = CollectionEvent::Record {
            tag: tag.clone(),
            record,
        };
        if tx.send(event).await.is_err() {
            return false;
        }
        *sent += 1;
    }
    true
}

/// Merged, back-pressured stream of collection events.
///
/// Dropping the stream cancels the run: workers observe the closed
/// channel (or the cancellation token) and stop fetching.
pub struct RecordStream {
    rx: mpsc::Receiver<CollectionEvent>,
    cancel: CancellationToken,
}

impl RecordStream {
    /// Receive the next event, or `None` once every request has finished
    pub async fn next(&mut self) -> Option<CollectionEvent> {
        self.rx.recv().await
    }

    /// Stop the run: no new page fetches, no new retry attempts
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// The run-level cancellation token
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Drain the whole run into memory
    pub async fn collect_all(mut self) -> CollectionSummary {
        let mut summary = CollectionSummary::default();
        while let Some(event) = self.next().await {
            match event {
                CollectionEvent::Record { record, .. } => summary.records.push(record),
                CollectionEvent::RequestFailed { tag, error } => {
                    summary.failures.push((tag, error));
                }
                CollectionEvent::RequestFinished { .. } => {}
            }
        }
        summary
    }
}

impl Stream for RecordStream {
    type Item = CollectionEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for RecordStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for RecordStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStream").finish_non_exhaustive()
    }
}
