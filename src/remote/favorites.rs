//! Top-N favorited subjects, used to build inclusion filters for browsing.

use std::collections::BTreeSet;

use super::client::MAX_PER_PAGE;
use crate::error::RemoteServiceError;
use crate::model::{ExternalId, SubjectType};

/// One page of favorited subject ids, in engagement order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FavoritesPage {
    pub ids: Vec<ExternalId>,
    pub total_count: u64,
}

/// Anything that can list favorited subjects of a type.
///
/// Implementations sort by the type's engagement key, descending: last
/// interaction for people, associated entry count otherwise.
pub trait FavoriteSource {
    fn fetch_favorites_page(
        &self,
        subject_type: SubjectType,
        page: u32,
        per_page: u32,
    ) -> Result<FavoritesPage, RemoteServiceError>;
}

/// Collect up to `limit` distinct favorited subject ids of `subject_type`.
///
/// An empty set is a valid outcome, not an error.
pub fn resolve_favorites<S: FavoriteSource + ?Sized>(
    source: &S,
    subject_type: SubjectType,
    limit: usize,
) -> Result<BTreeSet<ExternalId>, RemoteServiceError> {
    let mut ids = BTreeSet::new();
    if limit == 0 {
        return Ok(ids);
    }

    let per_page = limit.min(MAX_PER_PAGE as usize) as u32;
    let mut page = 1u32;
    loop {
        let batch = source.fetch_favorites_page(subject_type, page, per_page)?;
        let returned = batch.ids.len();
        for id in batch.ids {
            if ids.len() >= limit {
                break;
            }
            ids.insert(id);
        }

        let exhausted = returned == 0 || u64::from(page) * u64::from(per_page) >= batch.total_count;
        if ids.len() >= limit || exhausted {
            break;
        }
        page += 1;
    }

    tracing::debug!(subject_type = %subject_type, count = ids.len(), limit, "resolved favorites");
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;

    /// Serves a fixed favorites list, recording (page, per_page) requests.
    struct FixedFavorites {
        ids: Vec<String>,
        requests: RefCell<Vec<(u32, u32)>>,
    }

    impl FixedFavorites {
        fn new(ids: Vec<&str>) -> Self {
            Self {
                ids: ids.into_iter().map(str::to_string).collect(),
                requests: RefCell::new(Vec::new()),
            }
        }
    }

    impl FavoriteSource for FixedFavorites {
        fn fetch_favorites_page(
            &self,
            _subject_type: SubjectType,
            page: u32,
            per_page: u32,
        ) -> Result<FavoritesPage, RemoteServiceError> {
            self.requests.borrow_mut().push((page, per_page));
            let start = ((page - 1) * per_page) as usize;
            let ids = self
                .ids
                .iter()
                .skip(start)
                .take(per_page as usize)
                .cloned()
                .collect();
            Ok(FavoritesPage {
                ids,
                total_count: self.ids.len() as u64,
            })
        }
    }

    #[test]
    fn test_zero_favorites_is_empty_set() {
        let source = FixedFavorites::new(vec![]);
        let ids = resolve_favorites(&source, SubjectType::Person, 10).unwrap();
        assert!(ids.is_empty());
        assert_eq!(source.requests.borrow().len(), 1);
    }

    #[test]
    fn test_zero_limit_makes_no_call() {
        let source = FixedFavorites::new(vec!["a"]);
        assert!(resolve_favorites(&source, SubjectType::Person, 0).unwrap().is_empty());
        assert!(source.requests.borrow().is_empty());
    }

    #[test]
    fn test_limit_stops_paging() {
        let all: Vec<String> = (0..250).map(|i| format!("s{i:03}")).collect();
        let source = FixedFavorites::new(all.iter().map(String::as_str).collect());
        let ids = resolve_favorites(&source, SubjectType::Organization, 150).unwrap();
        assert_eq!(ids.len(), 150);
        assert_eq!(*source.requests.borrow(), vec![(1, 100), (2, 100)]);
        assert!(ids.contains("s000"));
        assert!(ids.contains("s149"));
        assert!(!ids.contains("s150"));
    }

    #[test]
    fn test_small_limit_uses_small_pages() {
        let source = FixedFavorites::new(vec!["a", "b", "c", "d", "e"]);
        let ids = resolve_favorites(&source, SubjectType::Descriptor, 2).unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(*source.requests.borrow(), vec![(1, 2)]);
    }

    #[test]
    fn test_duplicates_are_collapsed_until_exhausted() {
        let source = FixedFavorites::new(vec!["a", "a", "b"]);
        let ids = resolve_favorites(&source, SubjectType::Descriptor, 10).unwrap();
        assert_eq!(ids, BTreeSet::from(["a".to_string(), "b".to_string()]));
    }

    #[test]
    fn test_errors_propagate() {
        struct Failing;
        impl FavoriteSource for Failing {
            fn fetch_favorites_page(
                &self,
                _: SubjectType,
                _: u32,
                _: u32,
            ) -> Result<FavoritesPage, RemoteServiceError> {
                Err(RemoteServiceError::fatal("nope"))
            }
        }
        assert!(resolve_favorites(&Failing, SubjectType::Person, 5).is_err());
    }
}
