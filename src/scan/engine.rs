//! Fetch-until-full: fill a caller page with entries the local inventory lacks.
//!
//! The remote catalog cannot exclude owned ids server-side, and long runs of
//! remote pages may be entirely owned locally. A single call therefore keeps
//! scanning remote pages (at a fixed internal size of 100) until it has
//! `page_size` missing entries, the remote is exhausted, or
//! `max_pages` remote pages have been read. Stopping at the page bound is not
//! an error: the returned cursor resumes exactly where the scan stopped, so
//! every call makes forward progress.
//!
//! Calls are strictly sequential: one remote page in flight at a time, since
//! the resume offset depends on consuming pages in order.

use std::collections::HashSet;

use crate::cursor::CursorState;
use crate::error::RemoteServiceError;
use crate::inventory::LocalIdSet;
use crate::model::{ExternalId, PageResult, QueryScope, SortDirection, SortField};
use crate::remote::EntryPageSource;

/// Default bound on remote pages scanned in one call.
pub const MAX_PAGES_PER_REQUEST: u32 = 50;

/// Remote page size used internally, independent of the caller's page size.
pub const REMOTE_PAGE_SIZE: u32 = 100;

/// Largest page a caller may request.
pub const MAX_PAGE_SIZE: usize = 100;

/// Where and how to scan.
#[derive(Debug, Clone)]
pub struct FetchParams<'a> {
    pub endpoint: &'a str,
    pub scope: &'a QueryScope,
    pub page_size: usize,
    pub sort_field: SortField,
    pub sort_direction: SortDirection,
    /// 1-based remote page to start from.
    pub start_page: u32,
    /// Index within `start_page` to resume at.
    pub start_offset: u32,
    pub max_pages: u32,
    /// Remote total seen by the previous call, reported if no page is read.
    pub known_total: u64,
}

impl<'a> FetchParams<'a> {
    /// Parameters for a fresh scan with default sort and limits.
    pub fn fresh(endpoint: &'a str, scope: &'a QueryScope, page_size: usize) -> Self {
        Self {
            endpoint,
            scope,
            page_size,
            sort_field: SortField::default(),
            sort_direction: SortDirection::default(),
            start_page: 1,
            start_offset: 0,
            max_pages: MAX_PAGES_PER_REQUEST,
            known_total: 0,
        }
    }

    /// Continue from a decoded cursor.
    pub fn resume_from(mut self, cursor: &CursorState) -> Self {
        self.start_page = cursor.remote_page;
        self.start_offset = cursor.intra_page_offset;
        self.known_total = cursor.total_on_remote;
        self
    }
}

/// Collect up to `page_size` remote entries absent from `local_ids`.
///
/// A retryable error that survives the client's retries ends the call early:
/// the entries collected so far are returned with a cursor pointing at the
/// failed page. Non-retryable errors discard partial results.
pub fn fetch_until_full<S: EntryPageSource + ?Sized>(
    source: &S,
    local_ids: &LocalIdSet,
    params: &FetchParams<'_>,
) -> Result<PageResult, RemoteServiceError> {
    let page_size = params.page_size.clamp(1, MAX_PAGE_SIZE);
    let max_pages = params.max_pages.max(1);

    let mut collected = Vec::with_capacity(page_size);
    let mut emitted: HashSet<ExternalId> = HashSet::new();
    let mut pages_fetched = 0u32;
    let mut page = params.start_page.max(1);
    let mut offset = params.start_offset as usize;
    let mut total_on_remote = params.known_total;
    let mut is_complete = false;
    let mut interrupted = None;

    while collected.len() < page_size && pages_fetched < max_pages {
        let remote = match source.fetch_page(
            params.scope,
            page,
            REMOTE_PAGE_SIZE,
            params.sort_field,
            params.sort_direction,
        ) {
            Ok(remote) => remote,
            Err(e) if e.retryable => {
                tracing::warn!(
                    endpoint = params.endpoint,
                    page,
                    collected = collected.len(),
                    error = %e,
                    "stopping scan at failed page"
                );
                interrupted = Some(e.to_string());
                break;
            }
            Err(e) => return Err(e),
        };
        pages_fetched += 1;
        total_on_remote = remote.total_count;
        let has_more = remote.has_more;
        let page_len = remote.entries.len();

        if page_len == 0 {
            is_complete = true;
            break;
        }

        let mut filled_at = None;
        for (idx, entry) in remote.entries.into_iter().enumerate().skip(offset) {
            if local_ids.contains(&entry.external_id) {
                continue;
            }
            // The remote may repeat an entry across a page boundary.
            if !emitted.insert(entry.external_id.clone()) {
                continue;
            }
            collected.push(entry);
            if collected.len() >= page_size {
                filled_at = Some(idx);
                break;
            }
        }

        match filled_at {
            Some(idx) if idx + 1 < page_len => {
                offset = idx + 1;
                break;
            }
            Some(_) | None if !has_more => {
                is_complete = true;
                break;
            }
            _ => {
                page += 1;
                offset = 0;
            }
        }
    }

    if !is_complete && interrupted.is_none() && collected.len() < page_size {
        tracing::info!(
            endpoint = params.endpoint,
            pages_fetched,
            collected = collected.len(),
            next_page = page,
            "page bound reached before filling, returning cursor"
        );
    }

    let cursor = if is_complete {
        None
    } else {
        Some(
            CursorState {
                remote_page: page,
                intra_page_offset: offset as u32,
                sort_field: params.sort_field,
                sort_direction: params.sort_direction,
                scope: params.scope.clone(),
                remote_endpoint: params.endpoint.to_string(),
                total_on_remote,
            }
            .encode(),
        )
    };

    tracing::debug!(
        endpoint = params.endpoint,
        returned = collected.len(),
        pages_fetched,
        is_complete,
        "scan call finished"
    );

    Ok(PageResult {
        entries: collected,
        has_more: !is_complete,
        cursor,
        is_complete,
        total_on_remote,
        remote_pages_fetched_this_call: pages_fetched,
        interrupted,
    })
}
