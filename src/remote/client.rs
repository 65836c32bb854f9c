//! Remote query client: one page of entries per call, with retries.
//!
//! The client owns the retry policy. Transient failures (HTTP 429/5xx,
//! connection errors) are retried up to `max_retries` times with
//! [`RateLimiter::backoff`] between attempts; anything else fails at once.

use std::sync::Arc;

use serde_json::{Value, json};

use super::favorites::{FavoriteSource, FavoritesPage};
use super::rate_limit::RateLimiter;
use super::transport::CatalogTransport;
use crate::config::EndpointConfig;
use crate::error::RemoteServiceError;
use crate::model::{QueryScope, RemoteEntry, SortDirection, SortField, SubjectType};

/// Largest page the remote accepts.
pub const MAX_PER_PAGE: u32 = 100;

pub const DEFAULT_MAX_RETRIES: u32 = 3;

const FIND_ENTRIES_QUERY: &str = "query FindEntries($input: EntryQueryInput!) { \
queryEntries(input: $input) { count entries { id title release_date created updated \
details duration code urls { url site { name } } images { url width height } \
studio { id name } performers { performer { id name } } tags { id name } } } }";

/// One page of remote entries.
#[derive(Debug, Clone, PartialEq)]
pub struct RemotePage {
    pub entries: Vec<RemoteEntry>,
    pub total_count: u64,
    pub has_more: bool,
}

/// Anything that can serve pages of remote entries in a stable order.
pub trait EntryPageSource {
    fn fetch_page(
        &self,
        scope: &QueryScope,
        page: u32,
        per_page: u32,
        sort_field: SortField,
        sort_direction: SortDirection,
    ) -> Result<RemotePage, RemoteServiceError>;
}

/// Validate caller-supplied sort parameters, falling back to
/// `RELEASE_DATE` / `DESC` with a warning instead of failing.
pub fn validate_sort(sort_field: &str, sort_direction: &str) -> (SortField, SortDirection) {
    let field = sort_field.parse::<SortField>().unwrap_or_else(|e| {
        tracing::warn!(requested = %sort_field, error = %e, "invalid sort field, using RELEASE_DATE");
        SortField::ReleaseDate
    });
    let direction = sort_direction.parse::<SortDirection>().unwrap_or_else(|e| {
        tracing::warn!(requested = %sort_direction, error = %e, "invalid sort direction, using DESC");
        SortDirection::Desc
    });
    (field, direction)
}

fn filter_key(subject_type: SubjectType) -> &'static str {
    match subject_type {
        SubjectType::Person => "performers",
        SubjectType::Organization => "studios",
        SubjectType::Descriptor => "tags",
    }
}

/// GraphQL request body for one page of entries.
pub fn entry_query_body(
    scope: &QueryScope,
    page: u32,
    per_page: u32,
    sort_field: SortField,
    sort_direction: SortDirection,
) -> Value {
    let mut input = json!({
        "page": page,
        "per_page": per_page,
        "sort": sort_field.as_str(),
        "direction": sort_direction.as_str(),
    });

    match scope {
        QueryScope::Subject(ctx) => {
            input[filter_key(ctx.subject_type)] = json!({
                "value": [ctx.remote_id],
                "modifier": "INCLUDES",
            });
        }
        QueryScope::Browse(filters) => {
            for subject_type in SubjectType::ALL {
                if let Some(ids) = filters.inclusion(subject_type) {
                    input[filter_key(subject_type)] = json!({
                        "value": ids,
                        "modifier": "INCLUDES",
                    });
                }
            }
            let excluded = &filters.excluded_descriptor_ids;
            if !excluded.is_empty() {
                let tags = filter_key(SubjectType::Descriptor);
                if input.get(tags).is_some() {
                    input[tags]["excludes"] = json!(excluded);
                } else {
                    input[tags] = json!({ "value": excluded, "modifier": "EXCLUDES" });
                }
            }
        }
    }

    json!({ "query": FIND_ENTRIES_QUERY, "variables": { "input": input } })
}

fn favorites_query(subject_type: SubjectType) -> (&'static str, &'static str, &'static str) {
    // (root field, input type, engagement sort key)
    match subject_type {
        SubjectType::Person => ("queryPerformers", "PerformerQueryInput", "LAST_INTERACTION_AT"),
        SubjectType::Organization => ("queryStudios", "StudioQueryInput", "ENTRY_COUNT"),
        SubjectType::Descriptor => ("queryTags", "TagQueryInput", "ENTRY_COUNT"),
    }
}

/// GraphQL request body for one page of favorited subjects.
pub fn favorites_query_body(subject_type: SubjectType, page: u32, per_page: u32) -> Value {
    let (root, input_type, sort) = favorites_query(subject_type);
    let query = format!(
        "query FindFavorites($input: {input_type}!) {{ {root}(input: $input) {{ count items {{ id }} }} }}"
    );
    json!({
        "query": query,
        "variables": {
            "input": {
                "is_favorite": true,
                "page": page,
                "per_page": per_page,
                "sort": sort,
                "direction": SortDirection::Desc.as_str(),
            }
        }
    })
}

fn schema_error(what: impl std::fmt::Display) -> RemoteServiceError {
    RemoteServiceError::fatal(format!("unexpected response shape: {what}"))
}

fn response_root<'a>(response: &'a Value, field: &str) -> Result<&'a Value, RemoteServiceError> {
    if let Some(errors) = response.get("errors").and_then(Value::as_array)
        && !errors.is_empty()
    {
        let message = errors[0]
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        return Err(RemoteServiceError::fatal(format!("remote rejected query: {message}")));
    }
    response
        .get("data")
        .and_then(|d| d.get(field))
        .filter(|v| v.is_object())
        .ok_or_else(|| schema_error(format_args!("missing data.{field}")))
}

fn parse_entries_page(response: &Value, page: u32, per_page: u32) -> Result<RemotePage, RemoteServiceError> {
    let root = response_root(response, "queryEntries")?;
    let total_count = root
        .get("count")
        .and_then(Value::as_u64)
        .ok_or_else(|| schema_error("count is not an unsigned integer"))?;
    let raw = root
        .get("entries")
        .and_then(Value::as_array)
        .ok_or_else(|| schema_error("entries is not a list"))?;
    let entries = raw
        .iter()
        .cloned()
        .map(RemoteEntry::from_payload)
        .collect::<Result<Vec<_>, _>>()
        .map_err(schema_error)?;

    Ok(RemotePage {
        entries,
        total_count,
        has_more: u64::from(page) * u64::from(per_page) < total_count,
    })
}

fn parse_favorites_page(response: &Value, subject_type: SubjectType) -> Result<FavoritesPage, RemoteServiceError> {
    let (root_field, _, _) = favorites_query(subject_type);
    let root = response_root(response, root_field)?;
    let total_count = root
        .get("count")
        .and_then(Value::as_u64)
        .ok_or_else(|| schema_error("count is not an unsigned integer"))?;
    let ids = root
        .get("items")
        .and_then(Value::as_array)
        .ok_or_else(|| schema_error("items is not a list"))?
        .iter()
        .map(|item| {
            item.get("id")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| schema_error("favorite without id"))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(FavoritesPage { ids, total_count })
}

/// Client bound to a single remote endpoint.
pub struct RemoteQueryClient {
    transport: Arc<dyn CatalogTransport>,
    endpoint: EndpointConfig,
    api_key: String,
    limiter: Arc<RateLimiter>,
    max_retries: u32,
}

impl RemoteQueryClient {
    pub fn new(
        transport: Arc<dyn CatalogTransport>,
        endpoint: EndpointConfig,
        api_key: impl Into<String>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            transport,
            endpoint,
            api_key: api_key.into(),
            limiter,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Send a request, retrying transient failures.
    pub fn execute(&self, body: &Value) -> Result<Value, RemoteServiceError> {
        let mut attempt = 0;
        loop {
            self.limiter.wait();
            match self.transport.execute(&self.endpoint.url, &self.api_key, body) {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    let delay = self.limiter.backoff(attempt);
                    tracing::warn!(
                        endpoint = %self.endpoint.name,
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "remote request failed, retrying"
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => {
                    let retryable = e.is_retryable();
                    if retryable {
                        tracing::warn!(
                            endpoint = %self.endpoint.name,
                            attempts = attempt + 1,
                            error = %e,
                            "remote retries exhausted"
                        );
                    }
                    return Err(RemoteServiceError {
                        retryable,
                        status: e.status(),
                        message: e.to_string(),
                    });
                }
            }
        }
    }
}

impl EntryPageSource for RemoteQueryClient {
    fn fetch_page(
        &self,
        scope: &QueryScope,
        page: u32,
        per_page: u32,
        sort_field: SortField,
        sort_direction: SortDirection,
    ) -> Result<RemotePage, RemoteServiceError> {
        let page = page.max(1);
        let per_page = per_page.clamp(1, MAX_PER_PAGE);
        let body = entry_query_body(scope, page, per_page, sort_field, sort_direction);
        let response = self.execute(&body)?;
        let result = parse_entries_page(&response, page, per_page)?;
        tracing::debug!(
            endpoint = %self.endpoint.name,
            page,
            returned = result.entries.len(),
            total = result.total_count,
            "fetched remote page"
        );
        Ok(result)
    }
}

impl FavoriteSource for RemoteQueryClient {
    fn fetch_favorites_page(
        &self,
        subject_type: SubjectType,
        page: u32,
        per_page: u32,
    ) -> Result<FavoritesPage, RemoteServiceError> {
        let body = favorites_query_body(subject_type, page.max(1), per_page.clamp(1, MAX_PER_PAGE));
        let response = self.execute(&body)?;
        parse_favorites_page(&response, subject_type)
    }
}
