//! Redb-based persistent lane store implementation.

use std::path::Path;

use redb::{Database, ReadableTable, TableDefinition};
use tracing::debug;

use crate::{LaneRecord, LaneStore, StoreError, StoreResult};

const SETTINGS: TableDefinition<&str, &str> = TableDefinition::new("settings");
const LANES: TableDefinition<&str, &str> = TableDefinition::new("lanes");

const ACCESS_KEY: &str = "access_key";

fn storage<E: std::fmt::Display>(e: E) -> StoreError {
    StoreError::Storage(e.to_string())
}

/// A persistent lane store backed by redb.
///
/// redb takes an exclusive lock on the file, so only one process may hold the
/// store open at a time.
pub struct RedbStore {
    db: Database,
}

impl RedbStore {
    /// Open or create a redb store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(storage)?;
            }
        }
        let db = Database::create(path).map_err(storage)?;

        // Create the tables if they don't exist
        let tx = db.begin_write().map_err(storage)?;
        {
            let _ = tx.open_table(SETTINGS).map_err(storage)?;
            let _ = tx.open_table(LANES).map_err(storage)?;
        }
        tx.commit().map_err(storage)?;

        debug!(path = %path.display(), "opened lane store");
        Ok(Self { db })
    }
}

impl LaneStore for RedbStore {
    fn get_access_key(&self) -> StoreResult<Option<String>> {
        let tx = self.db.begin_read().map_err(storage)?;
        let table = tx.open_table(SETTINGS).map_err(storage)?;
        Ok(table
            .get(ACCESS_KEY)
            .map_err(storage)?
            .map(|value| value.value().to_string()))
    }

    fn save_access_key(&self, key: &str) -> StoreResult<()> {
        let tx = self.db.begin_write().map_err(storage)?;
        {
            let mut table = tx.open_table(SETTINGS).map_err(storage)?;
            table.insert(ACCESS_KEY, key).map_err(storage)?;
        }
        tx.commit().map_err(storage)?;
        Ok(())
    }

    fn list_lanes(&self) -> StoreResult<Vec<LaneRecord>> {
        let tx = self.db.begin_read().map_err(storage)?;
        let table = tx.open_table(LANES).map_err(storage)?;

        let mut lanes = Vec::new();
        for item in table.iter().map_err(storage)? {
            let (lane_id, ip) = item.map_err(storage)?;
            lanes.push(LaneRecord::new(lane_id.value(), ip.value()));
        }
        Ok(lanes)
    }

    fn lane_exists(&self, lane_id: &str) -> StoreResult<bool> {
        let tx = self.db.begin_read().map_err(storage)?;
        let table = tx.open_table(LANES).map_err(storage)?;
        Ok(table.get(lane_id).map_err(storage)?.is_some())
    }

    fn upsert_lane(&self, lane_id: &str, ip_address: &str) -> StoreResult<()> {
        let tx = self.db.begin_write().map_err(storage)?;
        {
            let mut table = tx.open_table(LANES).map_err(storage)?;
            table.insert(lane_id, ip_address).map_err(storage)?;
        }
        tx.commit().map_err(storage)?;
        Ok(())
    }

    fn delete_lane(&self, lane_id: &str) -> StoreResult<bool> {
        let tx = self.db.begin_write().map_err(storage)?;
        let removed = {
            let mut table = tx.open_table(LANES).map_err(storage)?;
            table.remove(lane_id).map_err(storage)?.is_some()
        };
        tx.commit().map_err(storage)?;
        Ok(removed)
    }
}
