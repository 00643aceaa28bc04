//! One lane's connection to the cloud service.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::SinkExt;
use futures::stream::{SplitSink, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use termgate_store::LaneConfig;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backoff::ReconnectBackoff;
use crate::config::CloudConfig;
use crate::dispatch::Dispatch;
use crate::error::Result;
use crate::message::{ChargeOutcome, ControlMessage, InboundCharge};
use crate::state::ConnectionState;

type CloudSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// How long `close` waits for the session to say goodbye before aborting it.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Outbound queue depth per session.
const OUTBOUND_QUEUE: usize = 64;

/// Raised when a lane gains or loses its cloud connection.
///
/// `generation` identifies which connection instance of the lane sent it;
/// a replaced connection always has a lower generation than its successor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectivityEvent {
    pub lane_id: String,
    pub generation: u64,
    pub connected: bool,
}

/// Persistent cloud connection for one lane.
///
/// After [`connect`](Self::connect) a background supervisor keeps the lane
/// online: it authenticates, heartbeats, dispatches charges and reconnects
/// with exponential backoff whenever the cloud drops the connection. Only
/// [`close`](Self::close) stops it.
///
/// The lane configuration is fixed for the lifetime of the value.
pub struct LaneConnection {
    inner: Arc<Inner>,
    task: Mutex<Option<Running>>,
}

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct Inner {
    lane: LaneConfig,
    generation: u64,
    config: CloudConfig,
    dispatcher: Arc<dyn Dispatch>,
    events: Option<mpsc::UnboundedSender<ConnectivityEvent>>,
    state_tx: watch::Sender<ConnectionState>,
    connected: AtomicBool,
}

enum SessionEnd {
    Cancelled,
    Lost,
}

impl LaneConnection {
    pub fn new(lane: LaneConfig, config: CloudConfig, dispatcher: Arc<dyn Dispatch>) -> Self {
        Self::build(lane, config, dispatcher, None, 0)
    }

    /// Creates a connection that reports connectivity changes on `events`.
    pub fn with_events(
        lane: LaneConfig,
        config: CloudConfig,
        dispatcher: Arc<dyn Dispatch>,
        events: mpsc::UnboundedSender<ConnectivityEvent>,
        generation: u64,
    ) -> Self {
        Self::build(lane, config, dispatcher, Some(events), generation)
    }

    fn build(
        lane: LaneConfig,
        config: CloudConfig,
        dispatcher: Arc<dyn Dispatch>,
        events: Option<mpsc::UnboundedSender<ConnectivityEvent>>,
        generation: u64,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                lane,
                generation,
                config,
                dispatcher,
                events,
                state_tx,
                connected: AtomicBool::new(false),
            }),
            task: Mutex::new(None),
        }
    }

    /// Starts the connection supervisor, replacing any previous one.
    ///
    /// Must be called within a Tokio runtime.
    pub fn connect(&self) {
        let mut task = self.task.lock();
        if let Some(previous) = task.take() {
            previous.cancel.cancel();
            previous.handle.abort();
        }
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(supervise(Arc::clone(&self.inner), cancel.clone()));
        *task = Some(Running { cancel, handle });
    }

    /// Shuts the connection down. No reconnect follows.
    pub async fn close(&self) {
        let running = self.task.lock().take();
        if let Some(Running { cancel, mut handle }) = running {
            cancel.cancel();
            if tokio::time::timeout(CLOSE_GRACE, &mut handle).await.is_err() {
                warn!(lane_id = %self.inner.lane.lane_id, "session did not stop in time, aborting");
                handle.abort();
            }
        }
        self.inner.set_state(ConnectionState::Closing);
        self.inner.notify(false);
        info!(lane_id = %self.inner.lane.lane_id, "lane connection closed");
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Watches state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    pub fn lane(&self) -> &LaneConfig {
        &self.inner.lane
    }

    pub fn lane_id(&self) -> &str {
        &self.inner.lane.lane_id
    }

    pub fn access_key(&self) -> &str {
        &self.inner.lane.access_key
    }

    pub fn ip_address(&self) -> &str {
        &self.inner.lane.ip_address
    }

    pub fn generation(&self) -> u64 {
        self.inner.generation
    }
}

impl Drop for LaneConnection {
    fn drop(&mut self) {
        if let Some(running) = self.task.get_mut().take() {
            running.cancel.cancel();
            running.handle.abort();
        }
    }
}

impl std::fmt::Debug for LaneConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaneConnection")
            .field("lane_id", &self.inner.lane.lane_id)
            .field("generation", &self.inner.generation)
            .field("state", &self.state())
            .finish()
    }
}

impl Inner {
    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(lane_id = %self.lane.lane_id, from = %previous, to = %state, "state changed");
        }
    }

    /// Emits a connectivity event when the connected flag actually flips.
    fn notify(&self, connected: bool) {
        if self.connected.swap(connected, Ordering::SeqCst) == connected {
            return;
        }
        if let Some(events) = &self.events {
            let _ = events.send(ConnectivityEvent {
                lane_id: self.lane.lane_id.clone(),
                generation: self.generation,
                connected,
            });
        }
    }
}

async fn supervise(inner: Arc<Inner>, cancel: CancellationToken) {
    let mut backoff = ReconnectBackoff::new(inner.config.backoff_initial, inner.config.backoff_max);
    let lane_id = inner.lane.lane_id.clone();

    loop {
        inner.set_state(ConnectionState::Connecting);
        match session(&inner, &cancel, &mut backoff).await {
            Ok(SessionEnd::Cancelled) => return,
            Ok(SessionEnd::Lost) => info!(lane_id = %lane_id, "cloud connection lost"),
            Err(e) => warn!(lane_id = %lane_id, error = %e, "cloud connection failed"),
        }
        if cancel.is_cancelled() {
            return;
        }

        inner.set_state(ConnectionState::Disconnected);
        inner.notify(false);

        let delay = backoff.next_delay();
        info!(lane_id = %lane_id, delay_ms = delay.as_millis() as u64, "reconnect scheduled");
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

async fn session(
    inner: &Arc<Inner>,
    cancel: &CancellationToken,
    backoff: &mut ReconnectBackoff,
) -> Result<SessionEnd> {
    let lane = &inner.lane;
    debug!(lane_id = %lane.lane_id, url = %inner.config.url, "connecting to cloud");

    let (ws, _response) = tokio::select! {
        _ = cancel.cancelled() => return Ok(SessionEnd::Cancelled),
        result = connect_async(inner.config.url.as_str()) => result?,
    };
    inner.set_state(ConnectionState::Authenticated);

    let (mut sink, mut stream) = ws.split();
    sink.send(encode(&ControlMessage::auth(lane))?).await?;

    let (out_tx, out_rx) = mpsc::channel(OUTBOUND_QUEUE);
    let mut writer = tokio::spawn(write_loop(sink, out_rx));

    // In-flight charges belong to this session.
    let charges = cancel.child_token();
    let _charges_guard = charges.clone().drop_guard();

    inner.notify(true);
    inner.set_state(ConnectionState::Active);
    info!(lane_id = %lane.lane_id, "lane authenticated");

    let period = inner.config.heartbeat_interval;
    let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

    // The reconnect delay only starts over once the cloud has kept the session
    // for a heartbeat period or sent something.
    let mut healthy = false;

    let end = loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = out_tx.send(Message::Close(None)).await;
                break SessionEnd::Cancelled;
            }
            _ = heartbeat.tick() => {
                if out_tx.send(encode(&ControlMessage::heartbeat(lane))?).await.is_err() {
                    break SessionEnd::Lost;
                }
                debug!(lane_id = %lane.lane_id, "heartbeat sent");
                mark_healthy(&mut healthy, backoff);
            }
            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    mark_healthy(&mut healthy, backoff);
                    handle_inbound(inner, text.as_str().as_bytes(), &out_tx, &charges).await;
                }
                Some(Ok(Message::Binary(data))) => {
                    mark_healthy(&mut healthy, backoff);
                    handle_inbound(inner, &data, &out_tx, &charges).await;
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(lane_id = %lane.lane_id, ?frame, "cloud closed the connection");
                    break SessionEnd::Lost;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(lane_id = %lane.lane_id, error = %e, "cloud read error");
                    break SessionEnd::Lost;
                }
                None => break SessionEnd::Lost,
            },
        }
    };

    drop(out_tx);
    if matches!(end, SessionEnd::Cancelled)
        && tokio::time::timeout(CLOSE_GRACE, &mut writer).await.is_ok()
    {
        return Ok(end);
    }
    writer.abort();
    Ok(end)
}

fn mark_healthy(healthy: &mut bool, backoff: &mut ReconnectBackoff) {
    if !*healthy {
        *healthy = true;
        backoff.reset();
    }
}

async fn write_loop(mut sink: CloudSink, mut rx: mpsc::Receiver<Message>) {
    while let Some(message) = rx.recv().await {
        if let Message::Close(_) = message {
            let _ = sink.close().await;
            break;
        }
        if let Err(e) = sink.send(message).await {
            error!("cloud write error: {}", e);
            break;
        }
    }
}

async fn handle_inbound(
    inner: &Arc<Inner>,
    data: &[u8],
    out_tx: &mpsc::Sender<Message>,
    charges: &CancellationToken,
) {
    let lane = &inner.lane;
    let inbound: InboundCharge = match serde_json::from_slice(data) {
        Ok(inbound) => inbound,
        Err(e) => {
            warn!(lane_id = %lane.lane_id, error = %e, "undecodable cloud message dropped");
            return;
        }
    };

    if inbound.lane_id != lane.lane_id {
        debug!(
            lane_id = %lane.lane_id,
            message_lane_id = %inbound.lane_id,
            "message for another lane dropped"
        );
        return;
    }

    let Some(charge) = inbound.instruction() else {
        info!(
            lane_id = %lane.lane_id,
            request_id = %inbound.request_id,
            action = %inbound.action,
            terminal_type = ?inbound.terminal_type,
            "unsupported instruction"
        );
        send_outcome(out_tx, &ChargeOutcome::unsupported(lane, &inbound.request_id)).await;
        return;
    };

    let inner = Arc::clone(inner);
    let out_tx = out_tx.clone();
    let cancel = charges.child_token();
    tokio::spawn(async move {
        let request_id = charge.request_id.clone();
        // A panicking dispatcher must not take the connection down with it.
        let dispatch = {
            let inner = Arc::clone(&inner);
            tokio::spawn(async move {
                inner
                    .dispatcher
                    .dispatch(&inner.lane, charge, cancel)
                    .await
            })
        };
        let outcome = match dispatch.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(
                    lane_id = %inner.lane.lane_id,
                    request_id = %request_id,
                    error = %e,
                    "charge dispatch failed"
                );
                let detail = format!("Unexpected error: {}", e);
                ChargeOutcome::failure(&inner.lane, &request_id, detail)
            }
        };
        info!(
            lane_id = %inner.lane.lane_id,
            request_id = %request_id,
            status = outcome.status,
            "charge outcome"
        );
        send_outcome(&out_tx, &outcome).await;
    });
}

async fn send_outcome(out_tx: &mpsc::Sender<Message>, outcome: &ChargeOutcome) {
    match encode(outcome) {
        Ok(message) => {
            if out_tx.send(message).await.is_err() {
                warn!(request_id = %outcome.request_id, "session closed, outcome dropped");
            }
        }
        Err(e) => error!(request_id = %outcome.request_id, error = %e, "failed to encode outcome"),
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Message> {
    Ok(Message::Binary(serde_json::to_vec(value)?.into()))
}
