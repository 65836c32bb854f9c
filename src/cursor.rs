//! Opaque resumption tokens.
//!
//! A cursor is an immutable [`CursorState`] serialized as canonical JSON and
//! wrapped in URL-safe base64. It is not a security boundary; the encoding
//! only keeps callers from depending on its shape.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};

use crate::error::InvalidCursorError;
use crate::model::{QueryScope, SortDirection, SortField};

/// Exact pagination position plus the query it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CursorState {
    /// 1-based remote page to fetch next.
    pub remote_page: u32,
    /// Index within `remote_page` where scanning resumes.
    pub intra_page_offset: u32,
    pub sort_field: SortField,
    pub sort_direction: SortDirection,
    pub scope: QueryScope,
    pub remote_endpoint: String,
    /// Remote total at the time the cursor was issued.
    #[serde(default)]
    pub total_on_remote: u64,
}

impl CursorState {
    pub fn encode(&self) -> String {
        // Struct fields and BTreeSets serialize in a fixed order, so the JSON
        // is canonical for a given state.
        let json = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    pub fn try_decode(token: &str) -> Result<Self, InvalidCursorError> {
        if token.is_empty() {
            return Err(InvalidCursorError("empty cursor".into()));
        }
        // Decoding then encoding must reproduce the token exactly.
        if token.trim() != token {
            return Err(InvalidCursorError("cursor has surrounding whitespace".into()));
        }
        let bytes = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|e| InvalidCursorError(format!("not base64: {e}")))?;
        let state: CursorState = serde_json::from_slice(&bytes)
            .map_err(|e| InvalidCursorError(format!("bad payload: {e}")))?;
        if state.remote_page == 0 {
            return Err(InvalidCursorError("remote page must be 1 or greater".into()));
        }
        Ok(state)
    }

    /// Decode a token, treating any failure as "no cursor".
    pub fn decode(token: &str) -> Option<Self> {
        match Self::try_decode(token) {
            Ok(state) => Some(state),
            Err(e) => {
                tracing::debug!(error = %e, "discarding undecodable cursor");
                None
            }
        }
    }

    /// Whether this cursor was produced for the same query.
    pub fn matches(
        &self,
        endpoint: &str,
        scope: &QueryScope,
        sort_field: SortField,
        sort_direction: SortDirection,
    ) -> bool {
        self.remote_endpoint == endpoint
            && &self.scope == scope
            && self.sort_field == sort_field
            && self.sort_direction == sort_direction
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::model::{FilterSet, SubjectContext, SubjectType};

    fn sample() -> CursorState {
        CursorState {
            remote_page: 3,
            intra_page_offset: 42,
            sort_field: SortField::Title,
            sort_direction: SortDirection::Asc,
            scope: QueryScope::Subject(SubjectContext {
                subject_type: SubjectType::Person,
                remote_id: "performer-1".into(),
            }),
            remote_endpoint: "primary".into(),
            total_on_remote: 250,
        }
    }

    #[test]
    fn test_encode_is_url_safe() {
        let token = sample().encode();
        assert!(
            token
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
    }

    #[test]
    fn test_decode_reencode_is_identical() {
        let token = sample().encode();
        let decoded = CursorState::decode(&token).unwrap();
        assert_eq!(decoded, sample());
        assert_eq!(decoded.encode(), token);
    }

    #[test]
    fn test_browse_scope_survives_round_trip() {
        let mut filters = FilterSet {
            excluded_descriptor_ids: BTreeSet::from(["t9".to_string()]),
            ..Default::default()
        };
        filters.set_inclusion(
            SubjectType::Organization,
            BTreeSet::from(["s2".to_string(), "s1".to_string()]),
        );
        let state = CursorState {
            scope: QueryScope::Browse(filters),
            ..sample()
        };
        assert_eq!(CursorState::decode(&state.encode()), Some(state));
    }

    #[test]
    fn test_garbage_decodes_to_none() {
        assert!(CursorState::decode("").is_none());
        assert!(CursorState::decode("   ").is_none());
        assert!(CursorState::decode("!!not base64!!").is_none());
        assert!(CursorState::decode(&URL_SAFE_NO_PAD.encode(b"{\"remote_page\":1}")).is_none());
        assert!(CursorState::decode(&URL_SAFE_NO_PAD.encode(b"\xff\xfe")).is_none());
    }

    #[test]
    fn test_padded_token_is_rejected() {
        let token = sample().encode();
        assert!(CursorState::try_decode(&format!(" {token}")).is_err());
        assert!(CursorState::try_decode(&format!("{token}\n")).is_err());
        assert!(CursorState::decode(&format!("\t{token} ")).is_none());
        assert_eq!(CursorState::try_decode(&token).unwrap().encode(), token);
    }

    #[test]
    fn test_page_zero_is_rejected() {
        let state = CursorState {
            remote_page: 0,
            ..sample()
        };
        assert!(CursorState::try_decode(&state.encode()).is_err());
    }

    #[test]
    fn test_matches_detects_changed_query() {
        let state = sample();
        let scope = state.scope.clone();
        assert!(state.matches("primary", &scope, SortField::Title, SortDirection::Asc));
        assert!(!state.matches("other", &scope, SortField::Title, SortDirection::Asc));
        assert!(!state.matches("primary", &scope, SortField::Title, SortDirection::Desc));
        assert!(!state.matches(
            "primary",
            &QueryScope::unfiltered(),
            SortField::Title,
            SortDirection::Asc
        ));
    }
}
