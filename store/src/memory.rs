//! In-memory lane store implementation for testing.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::{LaneRecord, LaneStore, StoreError, StoreResult};

#[derive(Default)]
struct Inner {
    access_key: Option<String>,
    lanes: BTreeMap<String, String>,
}

/// An in-memory lane store backed by a BTreeMap.
#[derive(Clone, Default)]
pub struct MemoryStore {
    data: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl LaneStore for MemoryStore {
    fn get_access_key(&self) -> StoreResult<Option<String>> {
        let data = self
            .data
            .lock()
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        Ok(data.access_key.clone())
    }

    fn save_access_key(&self, key: &str) -> StoreResult<()> {
        let mut data = self
            .data
            .lock()
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        data.access_key = Some(key.to_string());
        Ok(())
    }

    fn list_lanes(&self) -> StoreResult<Vec<LaneRecord>> {
        let data = self
            .data
            .lock()
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        Ok(data
            .lanes
            .iter()
            .map(|(id, ip)| LaneRecord::new(id.as_str(), ip.as_str()))
            .collect())
    }

    fn lane_exists(&self, lane_id: &str) -> StoreResult<bool> {
        let data = self
            .data
            .lock()
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        Ok(data.lanes.contains_key(lane_id))
    }

    fn upsert_lane(&self, lane_id: &str, ip_address: &str) -> StoreResult<()> {
        let mut data = self
            .data
            .lock()
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        data.lanes
            .insert(lane_id.to_string(), ip_address.to_string());
        Ok(())
    }

    fn delete_lane(&self, lane_id: &str) -> StoreResult<bool> {
        let mut data = self
            .data
            .lock()
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        Ok(data.lanes.remove(lane_id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_access_key() {
        let store = MemoryStore::new();
        assert_eq!(store.get_access_key().unwrap(), None);

        store.save_access_key("first").unwrap();
        store.save_access_key("second").unwrap();
        assert_eq!(store.get_access_key().unwrap().as_deref(), Some("second"));
    }

    #[test]
    fn test_memory_lanes() {
        let store = MemoryStore::new();
        assert!(!store.lane_exists("5").unwrap());

        store.upsert_lane("5", "10.0.0.5").unwrap();
        store.upsert_lane("5", "10.0.0.6").unwrap();
        assert!(store.lane_exists("5").unwrap());
        assert_eq!(
            store.list_lanes().unwrap(),
            vec![LaneRecord::new("5", "10.0.0.6")]
        );

        assert!(store.delete_lane("5").unwrap());
        assert!(!store.delete_lane("5").unwrap());
        assert!(store.list_lanes().unwrap().is_empty());
    }
}
