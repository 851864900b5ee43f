//! Tests for the parallel collector

use super::*;
use crate::http::{HttpClient, HttpClientConfig, RateBudget, RetryPolicy};
use crate::pagination::CollectionRequest;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_client(server: &MockServer) -> HttpClient {
    let config = HttpClientConfig::builder()
        .base_url(server.uri())
        .retry(RetryPolicy::none())
        .rate(RateBudget::new(1000, 1000))
        .build();
    HttpClient::new(config)
}

/// Mount a paginated collection for one license: `count` items in pages
/// of `page_size`, ids starting at `base`.
async fn mount_collection(server: &MockServer, license: &str, base: i64, count: i64, page_size: i64) {
    let num_pages = (count + page_size - 1) / page_size;
    for page in 1..=num_pages {
        let start = (page - 1) * page_size;
        let ids: Vec<_> = (start..(start + page_size).min(count))
            .map(|i| json!({"id": base + i, "licenseNumber": license}))
            .collect();
        Mock::given(method("GET"))
            .and(path("/v2/items"))
            .and(query_param("licenseNumber", license))
            .and(query_param("page", page.to_string()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": ids,
                "total": count,
                "page": page,
                "pageSize": page_size,
            })))
            .mount(server)
            .await;
    }
}

fn ids_for<'a>(
    summary: &'a CollectionSummary,
    license: &'a str,
) -> impl Iterator<Item = i64> + 'a {
    summary
        .records
        .iter()
        .filter(move |r| r["licenseNumber"] == license)
        .map(|r| r["id"].as_i64().unwrap())
}

#[tokio::test]
async fn test_single_request_merged_in_order() {
    let server = MockServer::start().await;
    mount_collection(&server, "CUL00001", 0, 5, 2).await;

    let collector = Collector::new(test_client(&server));
    let requests = vec![CollectionRequest::new("/v2/items", "CUL00001").with_page_size(2)];
    let summary = collector.run(requests).collect_all().await;

    assert!(summary.is_complete());
    assert_eq!(summary.records.len(), 5);
    let ids: Vec<_> = ids_for(&summary, "CUL00001").collect();
    assert_eq!(ids, vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn test_multiple_requests_preserve_per_request_order() {
    let server = MockServer::start().await;
    mount_collection(&server, "CUL00001", 0, 7, 2).await;
    mount_collection(&server, "CUL00002", 100, 4, 2).await;

    let collector =
        Collector::new(test_client(&server)).with_config(CollectorConfig::new(3));
    let requests = vec![
        CollectionRequest::new("/v2/items", "CUL00001").with_page_size(2),
        CollectionRequest::new("/v2/items", "CUL00002").with_page_size(2),
    ];
    let summary = collector.run(requests).collect_all().await;

    assert!(summary.is_complete());
    assert_eq!(summary.records.len(), 11);

    // Per-request page order survives the merge, whatever the interleaving.
    let first: Vec<_> = ids_for(&summary, "CUL00001").collect();
    let second: Vec<_> = ids_for(&summary, "CUL00002").collect();
    assert_eq!(first, vec![0, 1, 2, 3, 4, 5, 6]);
    assert_eq!(second, vec![100, 101, 102, 103]);
}

#[tokio::test]
async fn test_failed_request_does_not_abort_siblings() {
    let server = MockServer::start().await;
    mount_collection(&server, "CUL00001", 0, 4, 2).await;

    Mock::given(method("GET"))
        .and(path("/v2/items"))
        .and(query_param("licenseNumber", "BAD00001"))
        .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
        .mount(&server)
        .await;

    let collector = Collector::new(test_client(&server));
    let requests = vec![
        CollectionRequest::new("/v2/items", "CUL00001").with_page_size(2),
        CollectionRequest::new("/v2/items", "BAD00001").with_page_size(2),
    ];
    let summary = collector.run(requests).collect_all().await;

    assert_eq!(summary.records.len(), 4);
    assert_eq!(summary.failures.len(), 1);
    let (tag, error) = &summary.failures[0];
    assert_eq!(tag.label, "/v2/items BAD00001");
    assert!(error.to_string().contains("403"), "got: {error}");
}

#[tokio::test]
async fn test_fail_fast_cancels_outstanding_work() {
    let server = MockServer::start().await;

    // The healthy request would take many slow pages to finish.
    let slow_page = |page: i64| {
        json!({
            "data": [{"id": page, "licenseNumber": "CUL00001"}],
            "total": 50,
            "page": page,
            "pageSize": 1,
        })
    };
    for page in 1..=50 {
        Mock::given(method("GET"))
            .and(path("/v2/items"))
            .and(query_param("licenseNumber", "CUL00001"))
            .and(query_param("page", page.to_string()))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(slow_page(page))
                    .set_delay(Duration::from_millis(50)),
            )
            .mount(&server)
            .await;
    }

    Mock::given(method("GET"))
        .and(path("/v2/items"))
        .and(query_param("licenseNumber", "BAD00001"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
        .mount(&server)
        .await;

    let collector = Collector::new(test_client(&server))
        .with_config(CollectorConfig::new(2).fail_fast());
    let requests = vec![
        CollectionRequest::new("/v2/items", "CUL00001").with_page_size(1),
        CollectionRequest::new("/v2/items", "BAD00001").with_page_size(1),
    ];
    let summary = collector.run(requests).collect_all().await;

    // The bad request failed fatally; the healthy one was cancelled long
    // before its 50 pages completed.
    assert!(!summary.is_complete());
    assert!(summary
        .failures
        .iter()
        .any(|(tag, _)| tag.label == "/v2/items BAD00001"));
    assert!(
        summary.records.len() < 50,
        "expected cancellation, got {} records",
        summary.records.len()
    );
}

#[tokio::test]
async fn test_cancel_stops_new_fetches() {
    let server = MockServer::start().await;
    mount_collection(&server, "CUL00001", 0, 100, 1).await;

    // A tiny buffer keeps the worker from racing far ahead of the
    // consumer, so cancellation lands while pages remain unfetched.
    let collector = Collector::new(test_client(&server))
        .with_config(CollectorConfig::new(2).with_buffer(2));
    let requests = vec![CollectionRequest::new("/v2/items", "CUL00001").with_page_size(1)];
    let mut stream = collector.run(requests);

    // Take a few records, then cancel.
    let mut taken = 0;
    while let Some(event) = stream.next().await {
        if event.is_record() {
            taken += 1;
            if taken == 3 {
                stream.cancel();
            }
        }
    }
    assert!(taken < 100, "cancellation had no effect, got {taken}");
}

#[tokio::test]
async fn test_empty_request_list() {
    let server = MockServer::start().await;
    let collector = Collector::new(test_client(&server));
    let summary = collector.run(Vec::new()).collect_all().await;
    assert!(summary.is_complete());
    assert!(summary.records.is_empty());
}

#[test]
fn test_collector_config() {
    let config = CollectorConfig::new(0).with_buffer(0);
    assert_eq!(config.workers, 1);
    assert_eq!(config.buffer, 1);

    let config = CollectorConfig::new(8).fail_fast();
    assert_eq!(config.failure_mode, crate::types::FailureMode::FailFast);
}
