//! Pagination types
//!
//! `CollectionRequest` describes one logical collection operation;
//! `Page` is one batch of raw records plus continuation metadata.

use crate::error::{Error, Result};
use crate::types::{FilterLogic, JsonValue, RawRecord, StringMap};
use serde::{Deserialize, Serialize};

fn default_page_size() -> u32 {
    100
}

/// Immutable descriptor of one logical collection operation.
///
/// One request covers one endpoint filtered to one license; a harvest run
/// usually carries several of these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CollectionRequest {
    /// API endpoint path (e.g. "/v2/packages")
    pub endpoint: String,
    /// License number the collection is filtered to
    pub license_number: String,
    /// Records per page
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Optional cap on the total number of records fetched
    #[serde(default)]
    pub max_items: Option<u64>,
    /// Collection sort order (e.g. "label:asc")
    #[serde(default)]
    pub sort: Option<String>,
    /// Collection filters (e.g. "label__endswith:0003")
    #[serde(default)]
    pub filters: Vec<String>,
    /// How filters combine
    #[serde(default)]
    pub filter_logic: FilterLogic,
}

impl CollectionRequest {
    /// Create a request with default page size and no cap
    pub fn new(endpoint: impl Into<String>, license_number: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            license_number: license_number.into(),
            page_size: default_page_size(),
            max_items: None,
            sort: None,
            filters: Vec::new(),
            filter_logic: FilterLogic::default(),
        }
    }

    /// Set the page size
    #[must_use]
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Cap the total number of records fetched
    #[must_use]
    pub fn with_max_items(mut self, max_items: u64) -> Self {
        self.max_items = Some(max_items);
        self
    }

    /// Set the sort order
    #[must_use]
    pub fn with_sort(mut self, sort: impl Into<String>) -> Self {
        self.sort = Some(sort.into());
        self
    }

    /// Add a collection filter
    #[must_use]
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filters.push(filter.into());
        self
    }

    /// Short label identifying this request in errors and logs
    pub fn tag(&self) -> String {
        format!("{} {}", self.endpoint, self.license_number)
    }

    /// Query parameters for fetching `page` (1-based)
    pub(crate) fn query_for_page(&self, page: u32) -> StringMap {
        let mut query = StringMap::new();
        query.insert("licenseNumber".to_string(), self.license_number.clone());
        query.insert("page".to_string(), page.to_string());
        query.insert("pageSize".to_string(), self.page_size.to_string());
        if let Some(sort) = &self.sort {
            query.insert("sort".to_string(), sort.clone());
        }
        if !self.filters.is_empty() {
            query.insert("filter".to_string(), self.filters.join(","));
            query.insert("filterLogic".to_string(), self.filter_logic.to_string());
        }
        query
    }
}

/// One batch of raw records plus continuation metadata
#[derive(Debug, Clone)]
pub struct Page {
    /// Raw records for this page, in upstream order
    pub records: Vec<RawRecord>,
    /// Page number (1-based)
    pub page: u32,
    /// Page size the upstream applied
    pub page_size: u32,
    /// Total records across all pages, when the upstream reports it
    pub total: Option<u64>,
    /// Whether more pages follow
    pub has_more: bool,
}

impl Page {
    /// Parse a page out of a response body.
    ///
    /// Accepts the standard collection envelope
    /// `{"data": [...], "total": N, "page": N, "pageSize": N}` and, for
    /// lenient upstreams, a bare top-level array.
    pub fn from_body(body: JsonValue, endpoint: &str, page: u32, page_size: u32) -> Result<Self> {
        let (data, total) = match body {
            JsonValue::Object(mut envelope) => {
                let data = envelope
                    .remove("data")
                    .ok_or_else(|| Error::malformed_page(endpoint, "missing `data` array"))?;
                let total = envelope.get("total").and_then(JsonValue::as_u64);
                (data, total)
            }
            data @ JsonValue::Array(_) => (data, None),
            other => {
                return Err(Error::malformed_page(
                    endpoint,
                    format!("expected object or array body, got {}", type_name(&other)),
                ))
            }
        };

        let JsonValue::Array(items) = data else {
            return Err(Error::malformed_page(endpoint, "`data` is not an array"));
        };

        let mut records = Vec::with_capacity(items.len());
        for item in items {
            match item {
                JsonValue::Object(record) => records.push(record),
                other => {
                    return Err(Error::malformed_page(
                        endpoint,
                        format!("expected object record, got {}", type_name(&other)),
                    ))
                }
            }
        }

        let has_more = match total {
            Some(total) => u64::from(page) * u64::from(page_size) < total,
            None => !records.is_empty() && records.len() as u32 == page_size,
        };

        Ok(Self {
            records,
            page,
            page_size,
            total,
            has_more,
        })
    }

    /// Number of records in this page
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether this page carries no records
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}
