//! SQLite-backed local inventory.

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};

use super::{EntryLink, LocalInventory};
use crate::error::InventoryError;
use crate::model::{ExternalId, SubjectType};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS entry_links (
    entry_id    INTEGER NOT NULL,
    endpoint    TEXT NOT NULL,
    external_id TEXT NOT NULL,
    PRIMARY KEY (entry_id, endpoint)
);
CREATE TABLE IF NOT EXISTS subject_links (
    subject_type TEXT NOT NULL,
    local_id     TEXT NOT NULL,
    endpoint     TEXT NOT NULL,
    external_id  TEXT NOT NULL,
    PRIMARY KEY (subject_type, local_id, endpoint)
);
";

/// Local inventory stored in a SQLite database.
pub struct SqliteInventory {
    conn: Mutex<Connection>,
}

impl SqliteInventory {
    /// Open (creating if needed) the inventory at `path`.
    pub fn open(path: &Path) -> Result<Self, InventoryError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, InventoryError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, InventoryError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Record that local entry `entry_id` corresponds to `external_id` on `endpoint`.
    pub fn link_entry(&self, entry_id: i64, endpoint: &str, external_id: &str) -> Result<(), InventoryError> {
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO entry_links (entry_id, endpoint, external_id) VALUES (?1, ?2, ?3)",
            params![entry_id, endpoint, external_id],
        )?;
        Ok(())
    }

    /// Record the remote id of a local subject on `endpoint`.
    pub fn link_subject(
        &self,
        subject_type: SubjectType,
        local_id: &str,
        endpoint: &str,
        external_id: &str,
    ) -> Result<(), InventoryError> {
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO subject_links (subject_type, local_id, endpoint, external_id)
             VALUES (?1, ?2, ?3, ?4)",
            params![subject_type.as_str(), local_id, endpoint, external_id],
        )?;
        Ok(())
    }

    pub fn entry_count(&self) -> Result<u64, InventoryError> {
        let count: i64 = self
            .conn
            .lock()
            .query_row("SELECT COUNT(*) FROM entry_links", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }
}

impl LocalInventory for SqliteInventory {
    fn scan_links(&self, offset: usize, limit: usize) -> Result<Vec<EntryLink>, InventoryError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT external_id, endpoint FROM entry_links ORDER BY rowid LIMIT ?1 OFFSET ?2",
        )?;
        let rows = stmt.query_map(params![limit as i64, offset as i64], |row| {
            Ok(EntryLink {
                external_id: row.get(0)?,
                endpoint: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn resolve_subject(
        &self,
        subject_type: SubjectType,
        local_id: &str,
        endpoint: &str,
    ) -> Result<Option<ExternalId>, InventoryError> {
        let remote_id = self
            .conn
            .lock()
            .query_row(
                "SELECT external_id FROM subject_links
                 WHERE subject_type = ?1 AND local_id = ?2 AND endpoint = ?3",
                params![subject_type.as_str(), local_id, endpoint],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(remote_id.filter(|id| !id.is_empty()))
    }
}
