//! Two-phase lane reconciliation: registry first, then the local store.

use std::sync::Arc;

use termgate_store::{LaneConfig, SharedLaneStore};
use tracing::{debug, error, info, warn};

use crate::client::{LaneRegistration, LaneRegistry};

/// Which phases of a lane sync completed.
///
/// `synced_local` is never true unless `synced_remote` is, and
/// `created_local` never unless `synced_local` is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub synced_remote: bool,
    pub synced_local: bool,
    /// The lane was new to the local store rather than an address update.
    pub created_local: bool,
}

impl SyncReport {
    pub fn is_complete(&self) -> bool {
        self.synced_remote && self.synced_local
    }
}

/// Keeps the local store consistent with the remote lane registry.
///
/// The registry is the source of truth. The local store is a cache the
/// gateway reconnects from at startup, so a failed local write is reported
/// but never rolls back a successful remote one.
pub struct LaneSyncCoordinator {
    registry: Arc<dyn LaneRegistry>,
    store: SharedLaneStore,
}

impl LaneSyncCoordinator {
    pub fn new(registry: Arc<dyn LaneRegistry>, store: SharedLaneStore) -> Self {
        Self { registry, store }
    }

    /// Creates or updates `lane` remotely, then upserts it locally.
    pub async fn sync_lane(&self, lane: &LaneConfig) -> SyncReport {
        let remote = match self.registry.list_lanes().await {
            Ok(remote) => remote,
            Err(e) => {
                error!(lane_id = %lane.lane_id, error = %e, "failed to list remote lanes");
                return SyncReport::default();
            }
        };

        let registration = LaneRegistration::new(lane.lane_id.as_str(), lane.ip_address.as_str());
        let known = remote.iter().any(|r| r.lane_id == lane.lane_id);
        let written = if known {
            self.registry.update_lane(&registration).await
        } else {
            self.registry.create_lane(&registration).await
        };
        if let Err(e) = written {
            error!(lane_id = %lane.lane_id, known, error = %e, "remote lane write failed");
            return SyncReport::default();
        }

        let local = self.write_local(&lane.lane_id, &lane.ip_address);
        info!(
            lane_id = %lane.lane_id,
            created = !known,
            synced_local = local.is_some(),
            "lane synced"
        );
        SyncReport {
            synced_remote: true,
            synced_local: local.is_some(),
            created_local: local == Some(true),
        }
    }

    /// Deletes a lane remotely, then locally.
    pub async fn remove_lane(&self, lane_id: &str) -> SyncReport {
        match self.registry.delete_lane(lane_id).await {
            Ok(deleted) => info!(lane_id, deleted_id = %deleted, "remote lane deleted"),
            Err(e) => {
                error!(lane_id, error = %e, "remote lane delete failed");
                return SyncReport::default();
            }
        }

        let synced_local = match self.store.delete_lane(lane_id) {
            Ok(existed) => {
                if !existed {
                    warn!(lane_id, "lane was not stored locally");
                }
                true
            }
            Err(e) => {
                error!(lane_id, error = %e, "local lane delete failed");
                false
            }
        };
        SyncReport {
            synced_remote: true,
            synced_local,
            created_local: false,
        }
    }

    /// Upserts the lane locally. Returns whether it was inserted rather than
    /// updated, or `None` when the store failed.
    fn write_local(&self, lane_id: &str, ip_address: &str) -> Option<bool> {
        let result = self.store.lane_exists(lane_id).and_then(|existed| {
            self.store.upsert_lane(lane_id, ip_address)?;
            Ok(!existed)
        });
        match result {
            Ok(true) => {
                debug!(lane_id, ip_address, "lane inserted into local store");
                Some(true)
            }
            Ok(false) => {
                debug!(lane_id, ip_address, "lane address updated in local store");
                Some(false)
            }
            Err(e) => {
                error!(lane_id, error = %e, "local lane write failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::RemoteLane;
    use crate::error::{Error, Result};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use termgate_store::{LaneRecord, LaneStore, MemoryStore, StoreError, StoreResult};

    #[derive(Default)]
    struct FakeRegistry {
        lanes: Mutex<Vec<RemoteLane>>,
        calls: Mutex<Vec<String>>,
        fail_list: bool,
        fail_write: bool,
    }

    impl FakeRegistry {
        fn with_lane(lane_id: &str, ip: &str) -> Self {
            let registry = Self::default();
            registry.lanes.lock().push(remote(lane_id, ip));
            registry
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }
    }

    fn remote(lane_id: &str, ip: &str) -> RemoteLane {
        RemoteLane {
            id: None,
            lane_id: lane_id.to_string(),
            terminal_type: None,
            ip_address: ip.to_string(),
            is_active: true,
            tpn: None,
            auth_key: None,
            sn: None,
            activation_token: None,
            register_id: None,
        }
    }

    fn rejected() -> Error {
        Error::Api {
            method: "POST".to_string(),
            message: "nope".to_string(),
        }
    }

    #[async_trait]
    impl LaneRegistry for FakeRegistry {
        async fn ping(&self) -> Result<bool> {
            Ok(true)
        }

        async fn list_lanes(&self) -> Result<Vec<RemoteLane>> {
            self.calls.lock().push("list".to_string());
            if self.fail_list {
                return Err(rejected());
            }
            Ok(self.lanes.lock().clone())
        }

        async fn get_lane(&self, lane_id: &str) -> Result<RemoteLane> {
            self.lanes
                .lock()
                .iter()
                .find(|l| l.lane_id == lane_id)
                .cloned()
                .ok_or_else(rejected)
        }

        async fn create_lane(&self, lane: &LaneRegistration) -> Result<()> {
            self.calls.lock().push(format!("create:{}", lane.lane_id));
            if self.fail_write {
                return Err(rejected());
            }
            self.lanes.lock().push(remote(&lane.lane_id, &lane.ip_address));
            Ok(())
        }

        async fn update_lane(&self, lane: &LaneRegistration) -> Result<()> {
            self.calls.lock().push(format!("update:{}", lane.lane_id));
            if self.fail_write {
                return Err(rejected());
            }
            Ok(())
        }

        async fn delete_lane(&self, lane_id: &str) -> Result<String> {
            self.calls.lock().push(format!("delete:{}", lane_id));
            if self.fail_write {
                return Err(rejected());
            }
            Ok(lane_id.to_string())
        }
    }

    /// A store whose writes always fail.
    struct ReadOnlyStore;

    impl LaneStore for ReadOnlyStore {
        fn get_access_key(&self) -> StoreResult<Option<String>> {
            Ok(None)
        }
        fn save_access_key(&self, _key: &str) -> StoreResult<()> {
            Err(StoreError::Storage("read only".to_string()))
        }
        fn list_lanes(&self) -> StoreResult<Vec<LaneRecord>> {
            Ok(Vec::new())
        }
        fn lane_exists(&self, _lane_id: &str) -> StoreResult<bool> {
            Ok(false)
        }
        fn upsert_lane(&self, _lane_id: &str, _ip_address: &str) -> StoreResult<()> {
            Err(StoreError::Storage("read only".to_string()))
        }
        fn delete_lane(&self, _lane_id: &str) -> StoreResult<bool> {
            Err(StoreError::Storage("read only".to_string()))
        }
    }

    fn lane5() -> LaneConfig {
        LaneConfig::new("5", "10.0.0.5", "k1")
    }

    #[tokio::test]
    async fn test_new_lane_created_then_stored() {
        let registry = Arc::new(FakeRegistry::default());
        let store = Arc::new(MemoryStore::new());
        let coordinator = LaneSyncCoordinator::new(registry.clone(), store.clone());

        let report = coordinator.sync_lane(&lane5()).await;

        assert!(report.is_complete());
        assert!(report.created_local);
        assert_eq!(registry.calls(), vec!["list", "create:5"]);
        assert_eq!(
            store.list_lanes().unwrap(),
            vec![LaneRecord::new("5", "10.0.0.5")]
        );
    }

    #[tokio::test]
    async fn test_known_lane_updated_in_place() {
        let registry = Arc::new(FakeRegistry::with_lane("5", "10.0.0.4"));
        let store = Arc::new(MemoryStore::new());
        store.upsert_lane("5", "10.0.0.4").unwrap();
        let coordinator = LaneSyncCoordinator::new(registry.clone(), store.clone());

        let report = coordinator.sync_lane(&lane5()).await;

        assert!(report.is_complete());
        assert!(!report.created_local);
        assert_eq!(registry.calls(), vec!["list", "update:5"]);
        assert_eq!(
            store.list_lanes().unwrap(),
            vec![LaneRecord::new("5", "10.0.0.5")]
        );
    }

    /// Local insert-vs-update follows the local store, not the registry.
    #[tokio::test]
    async fn test_known_remote_lane_missing_locally_is_inserted() {
        let registry = Arc::new(FakeRegistry::with_lane("5", "10.0.0.4"));
        let store = Arc::new(MemoryStore::new());
        let coordinator = LaneSyncCoordinator::new(registry.clone(), store.clone());

        let report = coordinator.sync_lane(&lane5()).await;

        assert!(report.is_complete());
        assert!(report.created_local);
        assert_eq!(registry.calls(), vec!["list", "update:5"]);
        assert!(store.lane_exists("5").unwrap());

        let again = coordinator.sync_lane(&lane5()).await;
        assert!(again.is_complete());
        assert!(!again.created_local);
    }

    #[tokio::test]
    async fn test_remote_list_failure_leaves_store_untouched() {
        let registry = Arc::new(FakeRegistry {
            fail_list: true,
            ..Default::default()
        });
        let store = Arc::new(MemoryStore::new());
        let coordinator = LaneSyncCoordinator::new(registry.clone(), store.clone());

        let report = coordinator.sync_lane(&lane5()).await;

        assert_eq!(report, SyncReport::default());
        assert_eq!(registry.calls(), vec!["list"]);
        assert!(store.list_lanes().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remote_write_failure_leaves_store_untouched() {
        let registry = Arc::new(FakeRegistry {
            fail_write: true,
            ..Default::default()
        });
        let store = Arc::new(MemoryStore::new());
        let coordinator = LaneSyncCoordinator::new(registry.clone(), store.clone());

        let report = coordinator.sync_lane(&lane5()).await;

        assert_eq!(report, SyncReport::default());
        assert!(store.list_lanes().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_local_failure_keeps_remote_write() {
        let registry = Arc::new(FakeRegistry::default());
        let coordinator = LaneSyncCoordinator::new(registry.clone(), Arc::new(ReadOnlyStore));

        let report = coordinator.sync_lane(&lane5()).await;

        assert_eq!(
            report,
            SyncReport {
                synced_remote: true,
                synced_local: false,
                created_local: false,
            }
        );
        assert_eq!(registry.lanes.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_remove_lane() {
        let registry = Arc::new(FakeRegistry::with_lane("5", "10.0.0.5"));
        let store = Arc::new(MemoryStore::new());
        store.upsert_lane("5", "10.0.0.5").unwrap();
        let coordinator = LaneSyncCoordinator::new(registry.clone(), store.clone());

        assert!(coordinator.remove_lane("5").await.is_complete());
        assert!(!store.lane_exists("5").unwrap());
    }

    #[tokio::test]
    async fn test_remove_lane_remote_failure() {
        let registry = Arc::new(FakeRegistry {
            fail_write: true,
            ..Default::default()
        });
        let store = Arc::new(MemoryStore::new());
        store.upsert_lane("5", "10.0.0.5").unwrap();
        let coordinator = LaneSyncCoordinator::new(registry, store.clone());

        assert_eq!(coordinator.remove_lane("5").await, SyncReport::default());
        assert!(store.lane_exists("5").unwrap());
    }
}
