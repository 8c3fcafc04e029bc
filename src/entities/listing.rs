use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use crate::error::BloomeoError;
use crate::sources::bloomeo::{Gateway, GatewayRequest, endpoints};
use crate::transform::shape::{self, ResponseMode};

pub const MAX_PAGE_SIZE: u32 = 100;
pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const DEFAULT_MAX_PAGES: u32 = 5;
pub const MAX_AUTO_PAGES: u32 = 50;

const SEARCH_PAGE_SIZE: u32 = 1000;
const COUNT_PAGE_SIZE: u32 = 100;
const COUNT_MAX_PAGES: u32 = 50;

const SUMMARY_AUTO_PAGE_SIZE: u32 = 50;
const SUMMARY_AUTO_ITEM_CAP: usize = 500;
const FULL_AUTO_PAGE_SIZE: u32 = 20;
const FULL_AUTO_ITEM_CAP: usize = 100;

/// Bytes kept free for the non-item fields of a page response.
const ENVELOPE_RESERVE_BYTES: usize = 1024;

const TOTAL_COUNT_PATHS: &[&str] = &[
    "/total",
    "/totalCount",
    "/count",
    "/pagination/total",
    "/pagination/totalCount",
    "/pagination/count",
    "/_pagination/total",
    "/_pagination/totalCount",
    "/_pagination/count",
    "/meta/total",
    "/meta/totalCount",
    "/meta/count",
    "/totalElements",
    "/totalItems",
];

/// A validated `(page, page_size)` pair. Page sizes outside `1..=100` are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageWindow {
    page: u32,
    page_size: u32,
}

impl PageWindow {
    pub fn new(page: i64, page_size: i64) -> Result<Self, BloomeoError> {
        let size = u32::try_from(page_size)
            .ok()
            .filter(|size| (1..=MAX_PAGE_SIZE).contains(size))
            .ok_or_else(|| {
                BloomeoError::InvalidArgument(format!(
                    "page_size must be between 1 and {MAX_PAGE_SIZE} (got {page_size})"
                ))
            })?;
        let page = u32::try_from(page).map_err(|_| {
            BloomeoError::InvalidArgument(format!(
                "page must be between 0 and {} (got {page})",
                u32::MAX
            ))
        })?;
        Ok(Self {
            page,
            page_size: size,
        })
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page) * u64::from(self.page_size)
    }
}

/// Trial listing filter: an AND group and an OR group, as the upstream UI sends them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExperimentFilter {
    all_of: Vec<Value>,
    any_of: Vec<Value>,
}

fn text_clause(key: &str, mode: &str, value: &str) -> Value {
    json!({"key": key, "op": {"$text": {"mode": mode, "value": value}}})
}

impl ExperimentFilter {
    pub fn name(term: &str, exact_match: bool) -> Self {
        let mode = if exact_match { "eq" } else { "contains" };
        Self {
            all_of: Vec::new(),
            any_of: vec![text_clause("name", mode, term)],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.all_of.is_empty() && self.any_of.is_empty()
    }

    pub fn to_value(&self) -> Value {
        json!({
            "mode": "and",
            "filters": [
                {"mode": "and", "filters": self.all_of},
                {"mode": "or", "filters": self.any_of},
            ]
        })
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(untagged)]
pub enum TagCriteria {
    One(String),
    Many(Vec<String>),
}

/// Advanced search criteria. Text fields match by substring.
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
pub struct SearchCriteria {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Inclusive lower bound on `createdAt` (ISO-8601).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_after: Option<String>,
    /// Inclusive upper bound on `createdAt` (ISO-8601).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_before: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<TagCriteria>,
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl SearchCriteria {
    pub fn to_filter(&self) -> Result<ExperimentFilter, BloomeoError> {
        let mut filter = ExperimentFilter::default();
        if let Some(name) = non_blank(&self.name) {
            filter.any_of.push(text_clause("name", "contains", name));
        }
        if let Some(description) = non_blank(&self.description) {
            filter
                .any_of
                .push(text_clause("description", "contains", description));
        }
        if let Some(status) = non_blank(&self.status) {
            filter
                .all_of
                .push(json!({"key": "status", "op": {"$eq": status}}));
        }
        if let Some(after) = non_blank(&self.created_after) {
            filter
                .all_of
                .push(json!({"key": "createdAt", "op": {"$gte": after}}));
        }
        if let Some(before) = non_blank(&self.created_before) {
            filter
                .all_of
                .push(json!({"key": "createdAt", "op": {"$lte": before}}));
        }
        let tags: Vec<&str> = match &self.tags {
            Some(TagCriteria::One(tag)) => vec![tag.as_str()],
            Some(TagCriteria::Many(tags)) => tags.iter().map(String::as_str).collect(),
            None => Vec::new(),
        };
        for tag in tags.into_iter().map(str::trim).filter(|t| !t.is_empty()) {
            filter.all_of.push(text_clause("tags", "contains", tag));
        }

        if filter.is_empty() {
            return Err(BloomeoError::InvalidArgument(
                "at least one search criterion is required (name, description, status, created_after, created_before, tags)".into(),
            ));
        }
        Ok(filter)
    }
}

/// Filter and sort documents sent with every listing request.
#[derive(Debug, Clone, PartialEq)]
pub struct ListQuery {
    filter: Value,
    sort: Value,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            filter: ExperimentFilter::default().to_value(),
            sort: json!({"name": "asc"}),
        }
    }
}

impl ListQuery {
    pub fn new(filter: Option<Value>, sort: Option<Value>) -> Result<Self, BloomeoError> {
        let mut query = Self::default();
        if let Some(filter) = filter.filter(|f| !f.is_null()) {
            if !filter.is_object() {
                return Err(BloomeoError::InvalidArgument(
                    "filters must be a JSON object".into(),
                ));
            }
            query.filter = filter;
        }
        if let Some(sort) = sort.filter(|s| !s.is_null()) {
            if !sort.is_object() {
                return Err(BloomeoError::InvalidArgument("sort must be a JSON object".into()));
            }
            query.sort = sort;
        }
        Ok(query)
    }

    pub fn from_filter(filter: &ExperimentFilter) -> Self {
        Self {
            filter: filter.to_value(),
            ..Self::default()
        }
    }

    fn request(&self, page: u32, page_size: u32) -> GatewayRequest {
        GatewayRequest::get(endpoints::TRIAL_LIST)
            .query("page", page.to_string())
            .query("pageSize", page_size.to_string())
            .query("filter", self.filter.to_string())
            .query("sort", self.sort.to_string())
    }
}

#[derive(Debug, Clone)]
struct RawPage {
    items: Vec<Value>,
    total: Option<u64>,
}

fn find_total(response: &Value) -> Option<u64> {
    TOTAL_COUNT_PATHS.iter().find_map(|path| {
        let value = response.pointer(path)?;
        value
            .as_u64()
            .or_else(|| value.as_f64().filter(|f| f.is_finite() && *f >= 0.0).map(|f| f as u64))
    })
}

async fn fetch_page(
    gateway: &dyn Gateway,
    bearer_token: &str,
    query: &ListQuery,
    page: u32,
    page_size: u32,
) -> Result<RawPage, BloomeoError> {
    let response = gateway
        .call(&query.request(page, page_size), bearer_token)
        .await?;
    let total = find_total(&response);
    let items = match response {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("data") {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };
    Ok(RawPage { items, total })
}

fn has_more(offset: u64, returned: usize, page_size: u32, total: Option<u64>) -> bool {
    total
        .map(|value| offset.saturating_add(returned as u64) < value)
        .unwrap_or(returned as u64 == u64::from(page_size))
}

/// Collects items while the serialized list stays within a byte ceiling.
#[derive(Debug)]
struct ItemBudget {
    items: Vec<Value>,
    bytes: usize,
    ceiling: usize,
    truncated: bool,
}

impl ItemBudget {
    fn new(ceiling: usize) -> Self {
        Self {
            items: Vec::new(),
            bytes: 2,
            ceiling,
            truncated: false,
        }
    }

    fn remaining(&self) -> usize {
        self.ceiling.saturating_sub(self.bytes)
    }

    fn push(&mut self, item: Value) -> bool {
        let size = shape::serialized_size(&item).saturating_add(1);
        if self.bytes.saturating_add(size) > self.ceiling {
            self.truncated = true;
            return false;
        }
        self.bytes += size;
        self.items.push(item);
        true
    }
}

fn item_ceiling(max_response_bytes: usize) -> usize {
    max_response_bytes.saturating_sub(ENVELOPE_RESERVE_BYTES)
}

/// Items gathered from one or more listing pages.
#[derive(Debug, Clone, Serialize)]
pub struct AggregatedPage {
    pub items: Vec<Value>,
    pub returned: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_count: Option<u64>,
    pub pages_fetched: u32,
    pub has_more: bool,
    pub truncated: bool,
    pub mode: ResponseMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_page: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Fetches one listing page. `_id` of each item is the experiment id.
///
/// # Errors
///
/// Returns the gateway failure; the window itself was validated at construction.
pub async fn page(
    gateway: &dyn Gateway,
    bearer_token: &str,
    window: PageWindow,
    query: &ListQuery,
    max_response_bytes: usize,
) -> Result<AggregatedPage, BloomeoError> {
    let raw = fetch_page(
        gateway,
        bearer_token,
        query,
        window.page(),
        window.page_size(),
    )
    .await?;
    let returned_upstream = raw.items.len();
    let more = has_more(window.offset(), returned_upstream, window.page_size(), raw.total);

    let mut budget = ItemBudget::new(item_ceiling(max_response_bytes));
    for item in raw.items {
        if !budget.push(item) {
            break;
        }
    }
    let kept = budget.items.len();
    let truncated = budget.truncated;
    if truncated {
        debug!(
            page = window.page(),
            kept,
            returned = returned_upstream,
            "listing page truncated to response ceiling"
        );
    }

    Ok(AggregatedPage {
        returned: kept,
        items: budget.items,
        total_count: raw.total,
        pages_fetched: 1,
        has_more: more,
        truncated,
        mode: ResponseMode::Full,
        next_page: more.then(|| window.page() + 1),
        note: truncated.then(|| {
            format!(
                "Only {kept} of {returned_upstream} items fit the response size limit; request a smaller page_size."
            )
        }),
    })
}

/// Validates an auto-pagination page budget.
pub fn validate_max_pages(value: i64) -> Result<u32, BloomeoError> {
    u32::try_from(value)
        .ok()
        .filter(|pages| (1..=MAX_AUTO_PAGES).contains(pages))
        .ok_or_else(|| {
            BloomeoError::InvalidArgument(format!(
                "max_pages must be between 1 and {MAX_AUTO_PAGES} (got {value})"
            ))
        })
}

/// Walks listing pages from page 0 until `max_pages`, the last page, an item
/// cap, or the byte ceiling. A page whose estimated size would overflow the
/// ceiling is not fetched.
///
/// # Errors
///
/// Returns `InvalidArgument` when `max_pages` is outside `1..=50`, or the first
/// gateway failure.
pub async fn paginate_auto(
    gateway: &dyn Gateway,
    bearer_token: &str,
    query: &ListQuery,
    max_pages: u32,
    include_full_data: bool,
    max_response_bytes: usize,
) -> Result<AggregatedPage, BloomeoError> {
    let max_pages = validate_max_pages(i64::from(max_pages))?;
    let (page_size, item_cap, per_page_ceiling) = if include_full_data {
        (
            FULL_AUTO_PAGE_SIZE,
            FULL_AUTO_ITEM_CAP,
            Some(max_response_bytes / 4),
        )
    } else {
        (SUMMARY_AUTO_PAGE_SIZE, SUMMARY_AUTO_ITEM_CAP, None)
    };

    let mut budget = ItemBudget::new(item_ceiling(max_response_bytes));
    let mut pages_fetched = 0u32;
    let mut total_count = None;
    let mut more = true;
    let mut largest_page_bytes = 0usize;
    let mut cut_page = None;

    while more && pages_fetched < max_pages {
        if budget.items.len() >= item_cap {
            budget.truncated = true;
            break;
        }
        if pages_fetched > 0 && largest_page_bytes > budget.remaining() {
            debug!(
                pages_fetched,
                remaining = budget.remaining(),
                "next page would overflow the response ceiling"
            );
            budget.truncated = true;
            break;
        }

        let page = pages_fetched;
        let raw = fetch_page(gateway, bearer_token, query, page, page_size).await?;
        pages_fetched += 1;
        total_count = raw.total.or(total_count);
        let returned = raw.items.len();
        more = returned > 0
            && has_more(
                u64::from(page) * u64::from(page_size),
                returned,
                page_size,
                raw.total,
            );

        let before = budget.bytes;
        let page_limit = per_page_ceiling.map(|limit| before.saturating_add(limit));
        let mut kept_from_page = 0usize;
        for item in raw.items {
            let item = if include_full_data {
                item
            } else {
                shape::project_summary(&item)
            };
            if budget.items.len() >= item_cap {
                budget.truncated = true;
                break;
            }
            let fits_page = page_limit.is_none_or(|limit| {
                budget.bytes + shape::serialized_size(&item) + 1 <= limit
            });
            if !fits_page || !budget.push(item) {
                budget.truncated = true;
                break;
            }
            kept_from_page += 1;
        }
        if kept_from_page < returned {
            cut_page = Some(page);
        }
        largest_page_bytes = largest_page_bytes.max(budget.bytes - before);
        if budget.truncated {
            break;
        }
    }

    let more = more || cut_page.is_some();
    let truncated = budget.truncated && (more || budget.items.len() < returned_total(total_count));
    let next_page = cut_page.or_else(|| more.then_some(pages_fetched));
    let mode = if include_full_data {
        ResponseMode::Full
    } else {
        ResponseMode::Summary
    };
    let note = match (truncated, mode) {
        (true, _) => Some(match next_page {
            Some(next) => format!(
                "Stopped early to stay within the response size limit; continue with get_all_experiments page={next} page_size={page_size}."
            ),
            None => "Stopped early to stay within the response size limit.".to_string(),
        }),
        (false, ResponseMode::Summary) => Some(
            "Summary fields only (_id, name, description, status, createdAt, updatedAt); set include_full_data=true for complete records."
                .to_string(),
        ),
        (false, ResponseMode::Full) => None,
    };

    Ok(AggregatedPage {
        returned: budget.items.len(),
        items: budget.items,
        total_count,
        pages_fetched,
        has_more: more,
        truncated,
        mode,
        next_page,
        note,
    })
}

fn returned_total(total_count: Option<u64>) -> usize {
    total_count
        .and_then(|t| usize::try_from(t).ok())
        .unwrap_or(usize::MAX)
}

#[derive(Debug, Clone, Serialize)]
pub struct ExperimentCount {
    pub total: u64,
    /// True when counting stopped at the page cap, so `total` is a minimum.
    pub lower_bound: bool,
    pub total_pages: u64,
    pub page_size: u32,
    pub source: &'static str,
}

impl ExperimentCount {
    fn new(total: u64, lower_bound: bool, source: &'static str) -> Self {
        Self {
            total,
            lower_bound,
            total_pages: total.div_ceil(u64::from(DEFAULT_PAGE_SIZE)),
            page_size: DEFAULT_PAGE_SIZE,
            source,
        }
    }
}

/// Total number of experiments matching `query`.
///
/// Reads the upstream total from a one-item page, then a full page, and
/// finally counts page by page (at most 50 pages of 100).
pub async fn count(
    gateway: &dyn Gateway,
    bearer_token: &str,
    query: &ListQuery,
) -> Result<ExperimentCount, BloomeoError> {
    for probe_size in [1, COUNT_PAGE_SIZE] {
        let raw = fetch_page(gateway, bearer_token, query, 0, probe_size).await?;
        if let Some(total) = raw.total {
            return Ok(ExperimentCount::new(total, false, "upstream_total"));
        }
        if probe_size == COUNT_PAGE_SIZE && (raw.items.len() as u64) < u64::from(COUNT_PAGE_SIZE) {
            return Ok(ExperimentCount::new(raw.items.len() as u64, false, "pagination"));
        }
    }

    let mut total = 0u64;
    for page in 0..COUNT_MAX_PAGES {
        let raw = fetch_page(gateway, bearer_token, query, page, COUNT_PAGE_SIZE).await?;
        total += raw.items.len() as u64;
        if (raw.items.len() as u64) < u64::from(COUNT_PAGE_SIZE) {
            return Ok(ExperimentCount::new(total, false, "pagination"));
        }
    }
    debug!(total, "count stopped at the page cap");
    Ok(ExperimentCount::new(total, true, "pagination"))
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResults {
    pub experiments: Vec<Value>,
    pub count: usize,
    pub truncated: bool,
}

fn finish_search(items: impl Iterator<Item = Value>, max_response_bytes: usize) -> SearchResults {
    let mut budget = ItemBudget::new(item_ceiling(max_response_bytes));
    for item in items {
        if !budget.push(shape::project_summary(&item)) {
            break;
        }
    }
    SearchResults {
        count: budget.items.len(),
        truncated: budget.truncated,
        experiments: budget.items,
    }
}

fn name_matches(item: &Value, needle: &str, exact_match: bool) -> bool {
    let Some(name) = item.get("name").and_then(Value::as_str) else {
        return false;
    };
    let name = name.trim().to_lowercase();
    if exact_match {
        name == needle
    } else {
        name.contains(needle)
    }
}

/// Experiments whose name contains (or equals) `search_term`, case-insensitively.
pub async fn search_by_name(
    gateway: &dyn Gateway,
    bearer_token: &str,
    search_term: &str,
    exact_match: bool,
    max_response_bytes: usize,
) -> Result<SearchResults, BloomeoError> {
    let term = search_term.trim();
    if term.is_empty() {
        return Err(BloomeoError::InvalidArgument(
            "search_term must not be empty".into(),
        ));
    }
    let query = ListQuery::from_filter(&ExperimentFilter::name(term, exact_match));
    let raw = fetch_page(gateway, bearer_token, &query, 0, SEARCH_PAGE_SIZE).await?;
    let needle = term.to_lowercase();
    Ok(finish_search(
        raw.items
            .into_iter()
            .filter(|item| name_matches(item, &needle, exact_match)),
        max_response_bytes,
    ))
}

pub async fn search_advanced(
    gateway: &dyn Gateway,
    bearer_token: &str,
    criteria: &SearchCriteria,
    max_response_bytes: usize,
) -> Result<SearchResults, BloomeoError> {
    let query = ListQuery::from_filter(&criteria.to_filter()?);
    let raw = fetch_page(gateway, bearer_token, &query, 0, SEARCH_PAGE_SIZE).await?;
    Ok(finish_search(raw.items.into_iter(), max_response_bytes))
}
