//! Core value types shared by the remote client, the cache, and the engine.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

/// Identifier of an entry (or subject) in the remote catalog.
pub type ExternalId = String;

/// Kind of entity that can scope a remote query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectType {
    Person,
    Organization,
    Descriptor,
}

impl SubjectType {
    pub const ALL: [SubjectType; 3] = [Self::Person, Self::Organization, Self::Descriptor];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Person => "person",
            Self::Organization => "organization",
            Self::Descriptor => "descriptor",
        }
    }
}

impl fmt::Display for SubjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubjectType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "person" | "performer" => Ok(Self::Person),
            "organization" | "organisation" | "studio" => Ok(Self::Organization),
            "descriptor" | "tag" => Ok(Self::Descriptor),
            other => Err(format!(
                "unknown subject type {other:?} (expected person, organization or descriptor)"
            )),
        }
    }
}

/// A remote subject narrowing an entry query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubjectContext {
    pub subject_type: SubjectType,
    pub remote_id: ExternalId,
}

/// Inclusion and exclusion filters for unscoped browsing.
///
/// An inclusion set of `None` means "no filter on this axis". `Some` with an
/// empty set is an active filter that matches nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FilterSet {
    pub person_ids: Option<BTreeSet<ExternalId>>,
    pub organization_ids: Option<BTreeSet<ExternalId>>,
    pub descriptor_ids: Option<BTreeSet<ExternalId>>,
    pub excluded_descriptor_ids: BTreeSet<ExternalId>,
}

impl FilterSet {
    pub fn inclusion(&self, subject_type: SubjectType) -> Option<&BTreeSet<ExternalId>> {
        match subject_type {
            SubjectType::Person => self.person_ids.as_ref(),
            SubjectType::Organization => self.organization_ids.as_ref(),
            SubjectType::Descriptor => self.descriptor_ids.as_ref(),
        }
    }

    pub fn set_inclusion(&mut self, subject_type: SubjectType, ids: BTreeSet<ExternalId>) {
        let slot = match subject_type {
            SubjectType::Person => &mut self.person_ids,
            SubjectType::Organization => &mut self.organization_ids,
            SubjectType::Descriptor => &mut self.descriptor_ids,
        };
        *slot = Some(ids);
    }

    /// True when an active inclusion filter is empty, so no entry can match.
    pub fn is_provably_empty(&self) -> bool {
        SubjectType::ALL
            .iter()
            .any(|t| self.inclusion(*t).is_some_and(|ids| ids.is_empty()))
    }
}

/// What a remote entry query is scoped to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueryScope {
    Subject(SubjectContext),
    Browse(FilterSet),
}

impl QueryScope {
    pub fn unfiltered() -> Self {
        Self::Browse(FilterSet::default())
    }
}

/// Remote sort keys accepted by the entry query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SortField {
    #[default]
    ReleaseDate,
    Title,
    CreatedAt,
    UpdatedAt,
    Trending,
}

impl SortField {
    /// Wire name sent to the remote catalog.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ReleaseDate => "RELEASE_DATE",
            Self::Title => "TITLE",
            Self::CreatedAt => "CREATED_AT",
            Self::UpdatedAt => "UPDATED_AT",
            Self::Trending => "TRENDING",
        }
    }
}

impl FromStr for SortField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "RELEASE_DATE" | "DATE" => Ok(Self::ReleaseDate),
            "TITLE" => Ok(Self::Title),
            "CREATED_AT" | "CREATED" => Ok(Self::CreatedAt),
            "UPDATED_AT" | "UPDATED" => Ok(Self::UpdatedAt),
            "TRENDING" => Ok(Self::Trending),
            _ => Err(format!("unknown sort field {s:?}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

impl FromStr for SortDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ASC" | "ASCENDING" => Ok(Self::Asc),
            "DESC" | "DESCENDING" => Ok(Self::Desc),
            _ => Err(format!("unknown sort direction {s:?}")),
        }
    }
}

/// One entry from the remote catalog.
///
/// The typed fields are lifted out of `payload` for sorting and display; the
/// payload itself is passed through to callers untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteEntry {
    pub external_id: ExternalId,
    pub title: Option<String>,
    pub release_date: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub payload: Value,
}

impl RemoteEntry {
    /// Build an entry from the raw JSON object returned by the remote.
    pub fn from_payload(payload: Value) -> Result<Self, String> {
        let obj = payload
            .as_object()
            .ok_or_else(|| "entry is not a JSON object".to_string())?;
        let external_id = obj
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| "entry is missing a string id".to_string())?
            .to_string();
        let text = |key: &str| obj.get(key).and_then(Value::as_str).map(str::to_string);
        Ok(Self {
            title: text("title"),
            release_date: text("release_date").or_else(|| text("date")),
            created_at: text("created"),
            updated_at: text("updated"),
            external_id,
            payload,
        })
    }
}

impl Serialize for RemoteEntry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.payload.serialize(serializer)
    }
}

/// One page of missing entries returned to the caller.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResult {
    pub entries: Vec<RemoteEntry>,
    pub cursor: Option<String>,
    pub has_more: bool,
    pub is_complete: bool,
    pub total_on_remote: u64,
    pub remote_pages_fetched_this_call: u32,
    /// Set when the scan stopped at a page whose retries were exhausted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interrupted: Option<String>,
}

impl PageResult {
    /// Result for a scan that provably has nothing to return.
    pub fn empty_complete() -> Self {
        Self {
            entries: Vec::new(),
            cursor: None,
            has_more: false,
            is_complete: true,
            total_on_remote: 0,
            remote_pages_fetched_this_call: 0,
            interrupted: None,
        }
    }

    /// Running estimate of how many remote entries are still missing locally.
    pub fn estimated_missing(&self, local_count: usize) -> u64 {
        self.total_on_remote.saturating_sub(local_count as u64)
    }
}
