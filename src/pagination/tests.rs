//! Tests for the pagination module

use super::*;
use crate::http::{HttpClient, HttpClientConfig, RateBudget, RetryPolicy};
use pretty_assertions::assert_eq;
use serde_json::json;
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

/// Mount a 5-item collection served in pages of 2
async fn mount_items(server: &MockServer) {
    let pages = [
        json!({"data": [{"id": 1}, {"id": 2}], "total": 5, "page": 1, "pageSize": 2}),
        json!({"data": [{"id": 3}, {"id": 4}], "total": 5, "page": 2, "pageSize": 2}),
        json!({"data": [{"id": 5}], "total": 5, "page": 3, "pageSize": 2}),
    ];
    for (i, body) in pages.iter().enumerate() {
        Mock::given(method("GET"))
            .and(path("/v2/items"))
            .and(query_param("page", (i + 1).to_string()))
            .and(query_param("pageSize", "2"))
            .and(query_param("licenseNumber", "CUL00001"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }
}

#[test]
fn test_request_query_params() {
    let request = CollectionRequest::new("/v2/packages", "CUL00001")
        .with_page_size(50)
        .with_sort("label:asc")
        .with_filter("label__endswith:0003");

    let query = request.query_for_page(3);
    assert_eq!(query.get("licenseNumber"), Some(&"CUL00001".to_string()));
    assert_eq!(query.get("page"), Some(&"3".to_string()));
    assert_eq!(query.get("pageSize"), Some(&"50".to_string()));
    assert_eq!(query.get("sort"), Some(&"label:asc".to_string()));
    assert_eq!(
        query.get("filter"),
        Some(&"label__endswith:0003".to_string())
    );
    assert_eq!(query.get("filterLogic"), Some(&"and".to_string()));
}

#[test]
fn test_request_tag() {
    let request = CollectionRequest::new("/v2/packages", "CUL00001");
    assert_eq!(request.tag(), "/v2/packages CUL00001");
}

#[test]
fn test_page_from_envelope() {
    let body = json!({"data": [{"id": 1}], "total": 10, "page": 1, "pageSize": 1});
    let page = Page::from_body(body, "/v2/items", 1, 1).unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page.total, Some(10));
    assert!(page.has_more);
}

#[test]
fn test_page_from_bare_array() {
    let body = json!([{"id": 1}, {"id": 2}]);
    let page = Page::from_body(body, "/v2/items", 1, 2).unwrap();
    assert_eq!(page.len(), 2);
    assert_eq!(page.total, None);
    // A full page with no total means "maybe more".
    assert!(page.has_more);
}

#[test]
fn test_page_last_page_has_no_more() {
    let body = json!({"data": [{"id": 5}], "total": 5, "page": 3, "pageSize": 2});
    let page = Page::from_body(body, "/v2/items", 3, 2).unwrap();
    assert!(!page.has_more);
}

#[test]
fn test_page_rejects_missing_data() {
    let body = json!({"total": 5});
    let err = Page::from_body(body, "/v2/items", 1, 2).unwrap_err();
    assert!(err.to_string().contains("missing `data` array"));
}

#[test]
fn test_page_rejects_scalar_records() {
    let body = json!({"data": [1, 2, 3], "total": 3});
    let err = Page::from_body(body, "/v2/items", 1, 3).unwrap_err();
    assert!(err.to_string().contains("expected object record"));
}

#[tokio::test]
async fn test_walker_yields_pages_in_order() {
    let server = MockServer::start().await;
    mount_items(&server).await;

    let request = CollectionRequest::new("/v2/items", "CUL00001").with_page_size(2);
    let mut walker = PageWalker::new(test_client(&server), request);

    let mut sizes = Vec::new();
    let mut ids = Vec::new();
    while let Some(page) = walker.next_page().await.unwrap() {
        sizes.push(page.len());
        for record in &page.records {
            ids.push(record["id"].as_i64().unwrap());
        }
    }

    assert_eq!(sizes, vec![2, 2, 1]);
    assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    assert_eq!(walker.fetched(), 5);
}

#[tokio::test]
async fn test_walker_cap_truncates() {
    let server = MockServer::start().await;
    mount_items(&server).await;

    let request = CollectionRequest::new("/v2/items", "CUL00001")
        .with_page_size(2)
        .with_max_items(3);
    let mut walker = PageWalker::new(test_client(&server), request);

    let mut ids = Vec::new();
    while let Some(page) = walker.next_page().await.unwrap() {
        for record in &page.records {
            ids.push(record["id"].as_i64().unwrap());
        }
    }

    // The cap lands inside page 2; page 3 is never fetched.
    assert_eq!(ids, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_walker_restart() {
    let server = MockServer::start().await;
    mount_items(&server).await;

    let request = CollectionRequest::new("/v2/items", "CUL00001").with_page_size(2);
    let mut walker = PageWalker::new(test_client(&server), request);

    let first = walker.collect_records().await.unwrap();
    walker.restart();
    let second = walker.collect_records().await.unwrap();

    assert_eq!(first.len(), 5);
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_walker_fatal_error_terminates() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v2/items"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(
            json!({"data": [{"id": 1}, {"id": 2}], "total": 4, "page": 1, "pageSize": 2}),
        ))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v2/items"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(400).set_body_string("strict pagination violation"))
        .mount(&server)
        .await;

    let request = CollectionRequest::new("/v2/items", "CUL00001").with_page_size(2);
    let mut walker = PageWalker::new(test_client(&server), request);

    // First page stands.
    let page = walker.next_page().await.unwrap().unwrap();
    assert_eq!(page.len(), 2);

    // Second fetch fails fatally and ends the walk.
    assert!(walker.next_page().await.is_err());
    assert!(walker.next_page().await.unwrap().is_none());
    assert_eq!(walker.fetched(), 2);
}

#[tokio::test]
async fn test_walker_empty_collection() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v2/items"))
        .respond_with(ResponseTemplate::new(200).set_body_json(
            json!({"data": [], "total": 0, "page": 1, "pageSize": 2}),
        ))
        .mount(&server)
        .await;

    let request = CollectionRequest::new("/v2/items", "CUL00001").with_page_size(2);
    let mut walker = PageWalker::new(test_client(&server), request);

    let records = walker.collect_records().await.unwrap();
    assert!(records.is_empty());
}

#[test]
fn test_request_yaml_roundtrip() {
    let yaml = "endpoint: /v2/packages\nlicense_number: CUL00001\npage_size: 25\n";
    let request: CollectionRequest = serde_yaml::from_str(yaml).unwrap();
    assert_eq!(request.endpoint, "/v2/packages");
    assert_eq!(request.page_size, 25);
    assert_eq!(request.max_items, None);
}
