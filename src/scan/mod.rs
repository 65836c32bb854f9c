//! Missing-entry scanning.
//!
//! - **engine**: the fetch-until-full loop over remote pages
//! - **service**: resolves endpoints, subjects, favorites and cursors, then
//!   runs the engine

pub mod engine;
pub mod service;

pub use engine::{FetchParams, MAX_PAGE_SIZE, MAX_PAGES_PER_REQUEST, REMOTE_PAGE_SIZE, fetch_until_full};
pub use service::{FavoriteFilters, MissingScanner, ScanRequest, ScanSummary, SubjectRef};
