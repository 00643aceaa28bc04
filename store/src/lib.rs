//! Local store for the terminal gateway.
//!
//! Holds the merchant access key and the lane → terminal address mapping the
//! gateway reconnects from at startup. Provides a trait-based interface with an
//! in-memory implementation for testing and a redb-based implementation for
//! persistence.

pub mod memory;
pub mod redb;

use std::fmt;
use thiserror::Error;

pub use memory::MemoryStore;
pub use self::redb::RedbStore;

/// Errors that can occur in store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store: storage error: {0}")]
    Storage(String),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// A lane as persisted locally: the lane id and its terminal address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaneRecord {
    pub lane_id: String,
    pub ip_address: String,
}

impl LaneRecord {
    pub fn new(lane_id: impl Into<String>, ip_address: impl Into<String>) -> Self {
        Self {
            lane_id: lane_id.into(),
            ip_address: ip_address.into(),
        }
    }
}

/// A fully resolved lane definition.
///
/// Handed to a lane connection by value; a change to any field produces a
/// new connection rather than a mutation of a live one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaneConfig {
    pub lane_id: String,
    pub ip_address: String,
    pub access_key: String,
}

impl LaneConfig {
    pub fn new(
        lane_id: impl Into<String>,
        ip_address: impl Into<String>,
        access_key: impl Into<String>,
    ) -> Self {
        Self {
            lane_id: lane_id.into(),
            ip_address: ip_address.into(),
            access_key: access_key.into(),
        }
    }

    /// Builds a config from a stored lane record and the merchant key.
    pub fn from_record(record: LaneRecord, access_key: &str) -> Self {
        Self {
            lane_id: record.lane_id,
            ip_address: record.ip_address,
            access_key: access_key.to_string(),
        }
    }
}

/// Lane store trait.
///
/// Only the most recently saved access key is kept. Lanes are keyed by lane id.
pub trait LaneStore: Send + Sync {
    /// Get the stored access key, if any.
    fn get_access_key(&self) -> StoreResult<Option<String>>;

    /// Replace the stored access key.
    fn save_access_key(&self, key: &str) -> StoreResult<()>;

    /// List all stored lanes, ordered by lane id.
    fn list_lanes(&self) -> StoreResult<Vec<LaneRecord>>;

    /// Report whether a lane id is stored.
    fn lane_exists(&self, lane_id: &str) -> StoreResult<bool>;

    /// Insert a lane or update its address in place.
    fn upsert_lane(&self, lane_id: &str, ip_address: &str) -> StoreResult<()>;

    /// Delete a lane. Returns false if it was not stored.
    fn delete_lane(&self, lane_id: &str) -> StoreResult<bool>;

    /// Joins stored lanes with the stored access key.
    ///
    /// Returns an empty list when no key has been saved yet, since no lane can
    /// authenticate without one.
    fn lane_configs(&self) -> StoreResult<Vec<LaneConfig>> {
        let Some(key) = self.get_access_key()? else {
            return Ok(Vec::new());
        };
        Ok(self
            .list_lanes()?
            .into_iter()
            .map(|record| LaneConfig::from_record(record, &key))
            .collect())
    }
}

impl fmt::Debug for dyn LaneStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LaneStore {{ ... }}")
    }
}

/// A shared lane store for use in trait objects.
pub type SharedLaneStore = std::sync::Arc<dyn LaneStore>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lane_configs_without_key() {
        let store = MemoryStore::new();
        store.upsert_lane("1", "10.0.0.1").unwrap();
        assert!(store.lane_configs().unwrap().is_empty());
    }

    #[test]
    fn test_lane_configs_joins_key() {
        let store = MemoryStore::new();
        store.save_access_key("k1").unwrap();
        store.upsert_lane("2", "10.0.0.2").unwrap();
        store.upsert_lane("1", "10.0.0.1").unwrap();

        let configs = store.lane_configs().unwrap();
        assert_eq!(
            configs,
            vec![
                LaneConfig::new("1", "10.0.0.1", "k1"),
                LaneConfig::new("2", "10.0.0.2", "k1"),
            ]
        );
    }
}
