//! The set of live lane connections.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use termgate_store::LaneConfig;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::CloudConfig;
use crate::connection::{ConnectivityEvent, LaneConnection};
use crate::dispatch::Dispatch;

/// What a [`ConnectionRegistry::sync_connections`] call did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub created: usize,
    pub replaced: usize,
    pub unchanged: usize,
}

/// Owns every lane connection, keyed by lane id.
///
/// Connectivity events from all lanes flow into a single aggregator task,
/// the only writer of the "any lane connected" flag. Observers follow it
/// through [`subscribe`](Self::subscribe) and see a value only when it
/// changes.
pub struct ConnectionRegistry {
    config: CloudConfig,
    dispatcher: Arc<dyn Dispatch>,
    connections: Mutex<HashMap<String, Arc<LaneConnection>>>,
    generation: AtomicU64,
    events: mpsc::UnboundedSender<ConnectivityEvent>,
    status: watch::Receiver<bool>,
    aggregator: JoinHandle<()>,
}

impl ConnectionRegistry {
    /// Creates an empty registry. Must be called within a Tokio runtime.
    pub fn new(config: CloudConfig, dispatcher: Arc<dyn Dispatch>) -> Self {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(false);
        let aggregator = tokio::spawn(aggregate(events_rx, status_tx));
        Self {
            config,
            dispatcher,
            connections: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
            events,
            status,
            aggregator,
        }
    }

    /// Reconciles live connections against the configured lanes.
    ///
    /// A lane without a connection gets a new one. A lane whose access key or
    /// address changed has its connection closed and replaced; a live
    /// connection is never updated in place. Connections for lanes missing
    /// from `lanes` are left running.
    pub async fn sync_connections(&self, lanes: &[LaneConfig]) -> SyncSummary {
        let mut connections = self.connections.lock().await;
        let mut summary = SyncSummary::default();

        for lane in lanes {
            let unchanged = connections.get(&lane.lane_id).is_some_and(|c| {
                c.access_key() == lane.access_key && c.ip_address() == lane.ip_address
            });
            if unchanged {
                summary.unchanged += 1;
                continue;
            }

            match connections.remove(&lane.lane_id) {
                Some(old) => {
                    info!(
                        lane_id = %lane.lane_id,
                        "lane configuration changed, replacing connection"
                    );
                    old.close().await;
                    summary.replaced += 1;
                }
                None => {
                    info!(lane_id = %lane.lane_id, "opening lane connection");
                    summary.created += 1;
                }
            }

            let connection = Arc::new(self.open(lane.clone()));
            connections.insert(lane.lane_id.clone(), connection);
        }

        debug!(?summary, total = connections.len(), "connections synced");
        summary
    }

    fn open(&self, lane: LaneConfig) -> LaneConnection {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let connection = LaneConnection::with_events(
            lane,
            self.config.clone(),
            Arc::clone(&self.dispatcher),
            self.events.clone(),
            generation,
        );
        connection.connect();
        connection
    }

    /// Closes and forgets one lane's connection.
    pub async fn remove(&self, lane_id: &str) -> bool {
        let removed = self.connections.lock().await.remove(lane_id);
        match removed {
            Some(connection) => {
                connection.close().await;
                info!(lane_id, "lane connection removed");
                true
            }
            None => false,
        }
    }

    /// Closes and forgets every connection whose lane is not in `lanes`.
    ///
    /// Returns the removed lane ids, sorted.
    pub async fn retain_lanes(&self, lanes: &[LaneConfig]) -> Vec<String> {
        let stale: Vec<(String, Arc<LaneConnection>)> = {
            let mut connections = self.connections.lock().await;
            let keep: Vec<&str> = lanes.iter().map(|lane| lane.lane_id.as_str()).collect();
            let ids: Vec<String> = connections
                .keys()
                .filter(|id| !keep.contains(&id.as_str()))
                .cloned()
                .collect();
            ids.into_iter()
                .filter_map(|id| connections.remove(&id).map(|c| (id, c)))
                .collect()
        };

        let mut removed = Vec::with_capacity(stale.len());
        for (lane_id, connection) in stale {
            connection.close().await;
            info!(lane_id = %lane_id, "lane no longer configured, connection removed");
            removed.push(lane_id);
        }
        removed.sort();
        removed
    }

    /// Closes every connection.
    pub async fn shutdown(&self) {
        let drained: Vec<_> = self.connections.lock().await.drain().collect();
        for (_, connection) in drained {
            connection.close().await;
        }
        info!("all lane connections closed");
    }

    /// Follows the aggregate "any lane connected" flag.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.status.clone()
    }

    pub fn any_connected(&self) -> bool {
        *self.status.borrow()
    }

    pub async fn get(&self, lane_id: &str) -> Option<Arc<LaneConnection>> {
        self.connections.lock().await.get(lane_id).cloned()
    }

    pub async fn contains(&self, lane_id: &str) -> bool {
        self.connections.lock().await.contains_key(lane_id)
    }

    /// Lane ids with a connection, sorted.
    pub async fn lane_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.connections.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl Drop for ConnectionRegistry {
    fn drop(&mut self) {
        self.aggregator.abort();
    }
}

async fn aggregate(
    mut events: mpsc::UnboundedReceiver<ConnectivityEvent>,
    status: watch::Sender<bool>,
) {
    let mut aggregator = StatusAggregator::default();
    while let Some(event) = events.recv().await {
        let any = aggregator.apply(&event);
        let changed = status.send_if_modified(|current| {
            if *current == any {
                return false;
            }
            *current = any;
            true
        });
        if changed {
            info!(connected = any, "gateway connectivity changed");
        }
    }
}

/// Latest connectivity per lane.
#[derive(Debug, Default)]
struct StatusAggregator {
    lanes: HashMap<String, (u64, bool)>,
}

impl StatusAggregator {
    /// Records an event and returns whether any lane is connected.
    ///
    /// Events from an older generation than the one recorded for the lane
    /// come from a replaced connection and are ignored.
    fn apply(&mut self, event: &ConnectivityEvent) -> bool {
        let stale = self
            .lanes
            .get(&event.lane_id)
            .is_some_and(|(generation, _)| *generation > event.generation);
        if !stale {
            self.lanes
                .insert(event.lane_id.clone(), (event.generation, event.connected));
        }
        self.any_connected()
    }

    fn any_connected(&self) -> bool {
        self.lanes.values().any(|(_, connected)| *connected)
    }
}
