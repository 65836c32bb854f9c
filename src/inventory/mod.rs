//! The local inventory and the identifier cache built from it.
//!
//! The inventory is the user's own collection. Each local entry may be
//! linked to an external id on one or more remote endpoints; those links are
//! what "already owned" means when scanning a remote catalog.

pub mod cache;
pub mod sqlite;

use crate::error::InventoryError;
use crate::model::{ExternalId, SubjectType};

pub use cache::{CacheStats, LocalIdSet, LocalIdentifierCache};
pub use sqlite::SqliteInventory;

/// A local entry's external id on one endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryLink {
    pub external_id: ExternalId,
    pub endpoint: String,
}

/// Read access to the local inventory.
pub trait LocalInventory: Send + Sync {
    /// One page of entry links in a stable order.
    fn scan_links(&self, offset: usize, limit: usize) -> Result<Vec<EntryLink>, InventoryError>;

    /// Remote id of a local subject on `endpoint`, if linked.
    fn resolve_subject(
        &self,
        subject_type: SubjectType,
        local_id: &str,
        endpoint: &str,
    ) -> Result<Option<ExternalId>, InventoryError>;
}
