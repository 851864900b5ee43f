//! Lazy page walking

use super::types::{CollectionRequest, Page};
use crate::error::Result;
use crate::http::HttpClient;
use tracing::debug;

/// Fetch one page of `request` through the retrying transport
pub(crate) async fn fetch_page(
    client: &HttpClient,
    request: &CollectionRequest,
    page: u32,
) -> Result<Page> {
    let query = request.query_for_page(page);
    let body = client.get_json(&request.endpoint, &query).await?;
    Page::from_body(body, &request.endpoint, page, request.page_size)
}

/// Lazy, finite walk over one paginated collection.
///
/// Pages are fetched on demand through the retrying transport and yielded
/// in upstream order. A fatal fetch error ends the walk with that error;
/// pages already yielded stand. `restart` rewinds to the first page.
#[derive(Debug)]
pub struct PageWalker {
    client: HttpClient,
    request: CollectionRequest,
    next_page: u32,
    fetched: u64,
    done: bool,
}

impl PageWalker {
    /// Create a walker positioned before the first page
    pub fn new(client: HttpClient, request: CollectionRequest) -> Self {
        Self {
            client,
            request,
            next_page: 1,
            fetched: 0,
            done: false,
        }
    }

    /// The request this walker serves
    pub fn request(&self) -> &CollectionRequest {
        &self.request
    }

    /// Total records yielded so far
    pub fn fetched(&self) -> u64 {
        self.fetched
    }

    /// Rewind to the first page
    pub fn restart(&mut self) {
        self.next_page = 1;
        self.fetched = 0;
        self.done = false;
    }

    /// Fetch the next page, or `None` once the collection is exhausted.
    ///
    /// The walk ends when the upstream reports no more pages or when the
    /// request's item cap is reached, whichever comes first.
    pub async fn next_page(&mut self) -> Result<Option<Page>> {
        if self.done {
            return Ok(None);
        }

        let page_number = self.next_page;
        let mut page = match fetch_page(&self.client, &self.request, page_number).await {
            Ok(page) => page,
            Err(e) => {
                self.done = true;
                return Err(e);
            }
        };

        // An item cap truncates the page it lands in and ends the walk.
        if let Some(cap) = self.request.max_items {
            let remaining = cap.saturating_sub(self.fetched);
            if page.records.len() as u64 >= remaining {
                page.records.truncate(remaining as usize);
                page.has_more = false;
            }
        }

        if page.is_empty() && page.total.is_none() {
            // Lenient upstreams signal exhaustion with an empty page.
            self.done = true;
            if page.page > 1 {
                return Ok(None);
            }
        }

        self.fetched += page.records.len() as u64;
        self.next_page += 1;
        if !page.has_more {
            self.done = true;
        }

        debug!(
            "page {} of {}: {} records (total {:?})",
            page.page,
            self.request.tag(),
            page.len(),
            page.total
        );
        Ok(Some(page))
    }

    /// Drain the remaining pages into one record list
    pub async fn collect_records(&mut self) -> Result<Vec<crate::types::RawRecord>> {
        let mut records = Vec::new();
        while let Some(page) = self.next_page().await? {
            records.extend(page.records);
        }
        Ok(records)
    }
}
