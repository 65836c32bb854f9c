#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use serde_json::{Value, json};

use catalog_gaps::config::{EndpointConfig, ScanConfig};
use catalog_gaps::inventory::SqliteInventory;
use catalog_gaps::model::SubjectType;
use catalog_gaps::remote::{CatalogTransport, RateLimiter, TransportError};
use catalog_gaps::scan::MissingScanner;

pub const URL: &str = "https://catalog.test/graphql";
pub const ENDPOINT: &str = "primary";

#[derive(Debug, Clone, Default)]
pub struct FakeEntry {
    pub id: String,
    pub performers: Vec<String>,
    pub studio: Option<String>,
    pub tags: Vec<String>,
}

impl FakeEntry {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "title": format!("Entry {}", self.id),
            "release_date": "2024-01-01",
            "performers": self.performers.iter().map(|p| json!({"performer": {"id": p}})).collect::<Vec<_>>(),
            "studio": self.studio.as_ref().map(|s| json!({"id": s})),
            "tags": self.tags.iter().map(|t| json!({"id": t})).collect::<Vec<_>>(),
        })
    }
}

/// GraphQL transport backed by an in-memory catalog.
pub struct FakeCatalog {
    entries: Vec<FakeEntry>,
    favorites: HashMap<SubjectType, Vec<String>>,
    failures: Mutex<VecDeque<TransportError>>,
    page_failures: Mutex<HashMap<u64, usize>>,
    pub entry_calls: AtomicUsize,
    pub favorite_calls: AtomicUsize,
    pub requested_pages: Mutex<Vec<u64>>,
}

impl FakeCatalog {
    pub fn new(entries: Vec<FakeEntry>) -> Self {
        Self {
            entries,
            favorites: HashMap::new(),
            failures: Mutex::new(VecDeque::new()),
            page_failures: Mutex::new(HashMap::new()),
            entry_calls: AtomicUsize::new(0),
            favorite_calls: AtomicUsize::new(0),
            requested_pages: Mutex::new(Vec::new()),
        }
    }

    /// Catalog of `n` entries with ids `e1..=en`.
    pub fn numbered(n: usize) -> Self {
        Self::new((1..=n).map(|i| FakeEntry::new(format!("e{i}"))).collect())
    }

    pub fn with_favorites(mut self, subject_type: SubjectType, ids: &[&str]) -> Self {
        self.favorites
            .insert(subject_type, ids.iter().map(|s| s.to_string()).collect());
        self
    }

    /// Fail the next `times` requests with HTTP `status`.
    pub fn fail_next(&self, times: usize, status: u16) {
        let mut failures = self.failures.lock();
        for _ in 0..times {
            failures.push_back(TransportError::Status {
                status,
                message: format!("injected {status}"),
            });
        }
    }

    /// Answer the next `times` entry queries for `page` with HTTP 503.
    pub fn fail_page(&self, page: u64, times: usize) {
        *self.page_failures.lock().entry(page).or_insert(0) += times;
    }

    pub fn entry_calls(&self) -> usize {
        self.entry_calls.load(Ordering::SeqCst)
    }

    pub fn favorite_calls(&self) -> usize {
        self.favorite_calls.load(Ordering::SeqCst)
    }

    fn ids_of(filter: &Value, key: &str) -> Vec<String> {
        filter
            .get(key)
            .and_then(Value::as_array)
            .map(|ids| ids.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default()
    }

    fn matches(entry: &FakeEntry, input: &Value) -> bool {
        if let Some(filter) = input.get("performers") {
            let wanted = Self::ids_of(filter, "value");
            if !entry.performers.iter().any(|p| wanted.contains(p)) {
                return false;
            }
        }
        if let Some(filter) = input.get("studios") {
            let wanted = Self::ids_of(filter, "value");
            if !entry.studio.as_ref().is_some_and(|s| wanted.contains(s)) {
                return false;
            }
        }
        if let Some(filter) = input.get("tags") {
            let values = Self::ids_of(filter, "value");
            let modifier = filter.get("modifier").and_then(Value::as_str).unwrap_or("INCLUDES");
            let mut excluded = Self::ids_of(filter, "excludes");
            if modifier == "EXCLUDES" {
                excluded.extend(values);
            } else if !entry.tags.iter().any(|t| values.contains(t)) {
                return false;
            }
            if entry.tags.iter().any(|t| excluded.contains(t)) {
                return false;
            }
        }
        true
    }

    fn page_of<T: Clone>(items: &[T], input: &Value) -> Vec<T> {
        let page = input["page"].as_u64().unwrap_or(1) as usize;
        let per_page = input["per_page"].as_u64().unwrap_or(25) as usize;
        items
            .iter()
            .skip((page - 1) * per_page)
            .take(per_page)
            .cloned()
            .collect()
    }
}

impl CatalogTransport for FakeCatalog {
    fn execute(&self, _url: &str, api_key: &str, body: &Value) -> Result<Value, TransportError> {
        assert_eq!(api_key, "test-key");
        if let Some(err) = self.failures.lock().pop_front() {
            return Err(err);
        }

        let query = body["query"].as_str().unwrap_or_default();
        let input = &body["variables"]["input"];

        if query.contains("queryEntries") {
            self.entry_calls.fetch_add(1, Ordering::SeqCst);
            let page = input["page"].as_u64().unwrap_or(0);
            self.requested_pages.lock().push(page);
            if let Some(remaining) = self.page_failures.lock().get_mut(&page)
                && *remaining > 0
            {
                *remaining -= 1;
                return Err(TransportError::Status {
                    status: 503,
                    message: format!("page {page} unavailable"),
                });
            }
            let matching: Vec<&FakeEntry> = self.entries.iter().filter(|e| Self::matches(e, input)).collect();
            let page: Vec<Value> = Self::page_of(&matching, input).iter().map(|e| e.to_json()).collect();
            return Ok(json!({"data": {"queryEntries": {"count": matching.len(), "entries": page}}}));
        }

        self.favorite_calls.fetch_add(1, Ordering::SeqCst);
        let (root, subject_type) = [
            ("queryPerformers", SubjectType::Person),
            ("queryStudios", SubjectType::Organization),
            ("queryTags", SubjectType::Descriptor),
        ]
        .into_iter()
        .find(|(root, _)| query.contains(root))
        .expect("unknown query");
        let ids = self.favorites.get(&subject_type).cloned().unwrap_or_default();
        let items: Vec<Value> = Self::page_of(&ids, input).iter().map(|id| json!({"id": id})).collect();
        Ok(json!({"data": {root: {"count": ids.len(), "items": items}}}))
    }
}

pub fn config() -> ScanConfig {
    let mut endpoint = EndpointConfig::new(ENDPOINT, URL);
    endpoint.api_key = Some("test-key".into());
    ScanConfig {
        endpoints: vec![endpoint],
        ..Default::default()
    }
}

pub fn empty_inventory() -> SqliteInventory {
    SqliteInventory::open_in_memory().unwrap()
}

/// Inventory owning the given external ids on the test endpoint.
pub fn inventory_owning<'a>(ids: impl IntoIterator<Item = &'a str>) -> SqliteInventory {
    let inventory = empty_inventory();
    for (idx, id) in ids.into_iter().enumerate() {
        inventory.link_entry(idx as i64, URL, id).unwrap();
    }
    inventory
}

pub fn scanner(catalog: Arc<FakeCatalog>, inventory: SqliteInventory) -> MissingScanner {
    scanner_with_config(config(), catalog, inventory)
}

pub fn scanner_with_config(
    config: ScanConfig,
    catalog: Arc<FakeCatalog>,
    inventory: SqliteInventory,
) -> MissingScanner {
    MissingScanner::new(config, Arc::new(inventory), catalog)
        .with_rate_limiter(URL, Arc::new(RateLimiter::unthrottled()))
}
