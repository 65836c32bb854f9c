//! Request orchestration: from an inbound scan request to a page result.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::engine::{FetchParams, fetch_until_full};
use crate::config::{EndpointConfig, ScanConfig};
use crate::cursor::CursorState;
use crate::error::{ConfigurationError, RemoteServiceError, ScanError};
use crate::inventory::{LocalIdentifierCache, LocalInventory};
use crate::model::{
    ExternalId, FilterSet, PageResult, QueryScope, RemoteEntry, SortDirection, SortField,
    SubjectContext, SubjectType,
};
use crate::remote::{CatalogTransport, RateLimiter, RemoteQueryClient, resolve_favorites, validate_sort};

pub const DEFAULT_PAGE_SIZE: usize = 25;
pub const DEFAULT_FAVORITE_LIMIT: usize = 100;

/// A local subject to scope the scan to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectRef {
    pub subject_type: SubjectType,
    pub local_id: String,
}

/// Which favorite subject types to turn into inclusion filters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FavoriteFilters {
    pub persons: bool,
    pub organizations: bool,
    pub descriptors: bool,
    pub limit: usize,
}

impl Default for FavoriteFilters {
    fn default() -> Self {
        Self {
            persons: false,
            organizations: false,
            descriptors: false,
            limit: DEFAULT_FAVORITE_LIMIT,
        }
    }
}

impl FavoriteFilters {
    fn requested_types(&self) -> impl Iterator<Item = SubjectType> + '_ {
        SubjectType::ALL.into_iter().filter(|t| match t {
            SubjectType::Person => self.persons,
            SubjectType::Organization => self.organizations,
            SubjectType::Descriptor => self.descriptors,
        })
    }
}

/// One inbound "give me the next page of missing entries" request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRequest {
    /// Endpoint name or URL.
    pub remote_endpoint: String,
    pub subject: Option<SubjectRef>,
    pub page_size: usize,
    pub cursor: Option<String>,
    pub sort_field: String,
    pub sort_direction: String,
    pub favorite_filters: Option<FavoriteFilters>,
    pub excluded_descriptor_ids: BTreeSet<ExternalId>,
}

impl ScanRequest {
    pub fn new(remote_endpoint: impl Into<String>) -> Self {
        Self {
            remote_endpoint: remote_endpoint.into(),
            subject: None,
            page_size: DEFAULT_PAGE_SIZE,
            cursor: None,
            sort_field: SortField::default().as_str().to_string(),
            sort_direction: SortDirection::default().as_str().to_string(),
            favorite_filters: None,
            excluded_descriptor_ids: BTreeSet::new(),
        }
    }

    /// Same request, continuing from `cursor`.
    pub fn with_cursor(&self, cursor: Option<String>) -> Self {
        Self {
            cursor,
            ..self.clone()
        }
    }
}

/// Outcome of following cursors until the scan completes or stalls.
#[derive(Debug, Clone, Serialize)]
pub struct ScanSummary {
    pub entries: Vec<RemoteEntry>,
    pub calls: u32,
    pub remote_pages_fetched: u32,
    pub total_on_remote: u64,
    pub local_count: usize,
    /// Remote total minus local count, as of the last call.
    pub estimated_missing: u64,
    pub is_complete: bool,
    /// Resumes the scan when it stopped before completing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interrupted: Option<String>,
}

/// Finds remote entries missing from the local inventory, one page per call.
///
/// Holds the only shared mutable state: the identifier cache and the
/// per-endpoint rate limiters.
pub struct MissingScanner {
    config: ScanConfig,
    inventory: Arc<dyn LocalInventory>,
    cache: LocalIdentifierCache,
    transport: Arc<dyn CatalogTransport>,
    limiters: Mutex<HashMap<String, Arc<RateLimiter>>>,
}

impl MissingScanner {
    pub fn new(
        config: ScanConfig,
        inventory: Arc<dyn LocalInventory>,
        transport: Arc<dyn CatalogTransport>,
    ) -> Self {
        let cache = LocalIdentifierCache::new(Arc::clone(&inventory)).with_max_age(config.cache_max_age());
        Self {
            config,
            inventory,
            cache,
            transport,
            limiters: Mutex::new(HashMap::new()),
        }
    }

    /// Use `limiter` for every request to the endpoint at `url`.
    pub fn with_rate_limiter(self, url: impl Into<String>, limiter: Arc<RateLimiter>) -> Self {
        self.limiters.lock().insert(url.into(), limiter);
        self
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn cache(&self) -> &LocalIdentifierCache {
        &self.cache
    }

    pub fn endpoint(&self, key: &str) -> Result<&EndpointConfig, ConfigurationError> {
        self.config.endpoint(key)
    }

    fn limiter(&self, url: &str) -> Arc<RateLimiter> {
        let mut limiters = self.limiters.lock();
        Arc::clone(
            limiters
                .entry(url.to_string())
                .or_insert_with(|| Arc::new(RateLimiter::new(self.config.requests_per_second))),
        )
    }

    /// Client for a configured endpoint.
    pub fn client(&self, endpoint: &EndpointConfig) -> Result<RemoteQueryClient, ConfigurationError> {
        let api_key = endpoint.resolve_api_key()?;
        Ok(RemoteQueryClient::new(
            Arc::clone(&self.transport),
            endpoint.clone(),
            api_key,
            self.limiter(&endpoint.url),
        )
        .with_max_retries(self.config.max_retries))
    }

    fn resolve_subject(
        &self,
        endpoint: &EndpointConfig,
        subject: &SubjectRef,
    ) -> Result<SubjectContext, ScanError> {
        let remote_id = self
            .inventory
            .resolve_subject(subject.subject_type, &subject.local_id, &endpoint.url)?
            .ok_or_else(|| ConfigurationError::SubjectUnlinked {
                subject_type: subject.subject_type,
                local_id: subject.local_id.clone(),
                endpoint: endpoint.name.clone(),
            })?;
        Ok(SubjectContext {
            subject_type: subject.subject_type,
            remote_id,
        })
    }

    fn build_filters(
        &self,
        client: &RemoteQueryClient,
        request: &ScanRequest,
    ) -> Result<FilterSet, RemoteServiceError> {
        let mut filters = FilterSet {
            excluded_descriptor_ids: request.excluded_descriptor_ids.clone(),
            ..Default::default()
        };
        if let Some(favorites) = &request.favorite_filters {
            for subject_type in favorites.requested_types() {
                let ids = resolve_favorites(client, subject_type, favorites.limit)?;
                filters.set_inclusion(subject_type, ids);
                if filters.is_provably_empty() {
                    // Further lookups cannot make the filter match anything.
                    break;
                }
            }
        }
        Ok(filters)
    }

    fn resume_position(
        cursor: Option<&str>,
        endpoint: &str,
        scope: &QueryScope,
        sort_field: SortField,
        sort_direction: SortDirection,
    ) -> Option<CursorState> {
        let state = CursorState::decode(cursor?)?;
        if state.matches(endpoint, scope, sort_field, sort_direction) {
            Some(state)
        } else {
            tracing::warn!(
                endpoint,
                cursor_endpoint = %state.remote_endpoint,
                "cursor belongs to a different query, restarting scan"
            );
            None
        }
    }

    /// Produce the next page of missing entries for `request`.
    pub fn scan(&self, request: &ScanRequest) -> Result<PageResult, ScanError> {
        let endpoint = self.config.endpoint(&request.remote_endpoint)?;
        let client = self.client(endpoint)?;

        let subject = request
            .subject
            .as_ref()
            .map(|s| self.resolve_subject(endpoint, s))
            .transpose()?;

        // Must precede every remote call.
        let local_ids = self.cache.get_or_build(&endpoint.url)?;

        let scope = match subject {
            Some(ctx) => QueryScope::Subject(ctx),
            None => {
                let filters = self.build_filters(&client, request)?;
                if filters.is_provably_empty() {
                    tracing::info!(
                        endpoint = %endpoint.name,
                        "favorite filter matched no subjects, nothing to scan"
                    );
                    return Ok(PageResult::empty_complete());
                }
                QueryScope::Browse(filters)
            }
        };

        let (sort_field, sort_direction) = validate_sort(&request.sort_field, &request.sort_direction);
        let mut params = FetchParams::fresh(&endpoint.url, &scope, request.page_size);
        params.sort_field = sort_field;
        params.sort_direction = sort_direction;
        params.max_pages = self.config.max_pages_per_request;
        if let Some(cursor) = Self::resume_position(
            request.cursor.as_deref(),
            &endpoint.url,
            &scope,
            sort_field,
            sort_direction,
        ) {
            params = params.resume_from(&cursor);
        }

        Ok(fetch_until_full(&client, &local_ids, &params)?)
    }

    /// Follow cursors from `request` until the scan completes, a call is
    /// interrupted, or `max_calls` calls have been made.
    ///
    /// `on_page` sees each page with the running estimate of entries still
    /// missing. An incomplete summary carries the cursor to resume from.
    pub fn scan_to_end(
        &self,
        request: &ScanRequest,
        max_calls: u32,
        mut on_page: impl FnMut(&PageResult, u64),
    ) -> Result<ScanSummary, ScanError> {
        let mut summary = ScanSummary {
            entries: Vec::new(),
            calls: 0,
            remote_pages_fetched: 0,
            total_on_remote: 0,
            local_count: 0,
            estimated_missing: 0,
            is_complete: false,
            cursor: None,
            interrupted: None,
        };
        let mut next = request.clone();

        while summary.calls < max_calls.max(1) {
            let page = self.scan(&next)?;
            summary.local_count = self.local_count(&request.remote_endpoint);
            summary.estimated_missing = page.estimated_missing(summary.local_count);
            on_page(&page, summary.estimated_missing);

            summary.calls += 1;
            summary.remote_pages_fetched += page.remote_pages_fetched_this_call;
            summary.total_on_remote = summary.total_on_remote.max(page.total_on_remote);
            summary.is_complete = page.is_complete;
            summary.interrupted = page.interrupted;
            summary.cursor = page.cursor;
            summary.entries.extend(page.entries);

            if summary.is_complete || summary.interrupted.is_some() {
                break;
            }
            next = next.with_cursor(summary.cursor.clone());
        }

        Ok(summary)
    }

    fn local_count(&self, endpoint_key: &str) -> usize {
        self.config
            .endpoint(endpoint_key)
            .ok()
            .and_then(|endpoint| self.cache.stats(&endpoint.url))
            .map_or(0, |stats| stats.count)
    }

    /// Favorited subject ids of one type on an endpoint.
    pub fn favorites(
        &self,
        endpoint_key: &str,
        subject_type: SubjectType,
        limit: usize,
    ) -> Result<BTreeSet<ExternalId>, ScanError> {
        let endpoint = self.config.endpoint(endpoint_key)?;
        let client = self.client(endpoint)?;
        Ok(resolve_favorites(&client, subject_type, limit)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_defaults() {
        let request = ScanRequest::new("primary");
        assert_eq!(request.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(request.sort_field, "RELEASE_DATE");
        assert_eq!(request.sort_direction, "DESC");
        assert!(request.cursor.is_none());
    }

    #[test]
    fn test_with_cursor_keeps_query() {
        let mut request = ScanRequest::new("primary");
        request.page_size = 7;
        let next = request.with_cursor(Some("abc".into()));
        assert_eq!(next.page_size, 7);
        assert_eq!(next.cursor.as_deref(), Some("abc"));
    }

    #[test]
    fn test_requested_favorite_types() {
        let filters = FavoriteFilters {
            persons: true,
            descriptors: true,
            ..Default::default()
        };
        let types: Vec<_> = filters.requested_types().collect();
        assert_eq!(types, vec![SubjectType::Person, SubjectType::Descriptor]);
    }

    #[test]
    fn test_mismatched_cursor_restarts() {
        let scope = QueryScope::unfiltered();
        let token = CursorState {
            remote_page: 5,
            intra_page_offset: 3,
            sort_field: SortField::Title,
            sort_direction: SortDirection::Asc,
            scope: scope.clone(),
            remote_endpoint: "https://a.example/graphql".into(),
            total_on_remote: 0,
        }
        .encode();

        let same = MissingScanner::resume_position(
            Some(token.as_str()),
            "https://a.example/graphql",
            &scope,
            SortField::Title,
            SortDirection::Asc,
        );
        assert_eq!(same.map(|c| c.remote_page), Some(5));

        let other_sort = MissingScanner::resume_position(
            Some(token.as_str()),
            "https://a.example/graphql",
            &scope,
            SortField::ReleaseDate,
            SortDirection::Asc,
        );
        assert!(other_sort.is_none());
        assert!(
            MissingScanner::resume_position(
                Some("garbage"),
                "https://a.example/graphql",
                &scope,
                SortField::Title,
                SortDirection::Asc
            )
            .is_none()
        );
    }
}
