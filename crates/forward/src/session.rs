//! A running forward for one camera.
//!
//! The session task owns the listener, the connection table, and the
//! reconnect guard. Everything it does happens on its own task in response to
//! one of: an accepted client, an event from a connection pair, the health
//! check tick, the reconnect timer, or shutdown. Readers outside the task see
//! it through a [`SessionSnapshot`] published on a `watch` channel.

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use common::CameraRecord;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::binder::Binding;
use crate::config::ForwardConfig;
use crate::connection::{
    CloseReason, ConnectionId, ConnectionPair, PairEvent, PairEventKind,
};
use crate::dial::TargetDialer;
use crate::event::ForwardEvent;

/// Pause after a failed `accept` so a persistent error does not spin.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// How long a pair gets to wind down after being told to close.
const PAIR_CLOSE_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Starting,
    Listening,
    /// Clients attached, not all of them through to the camera yet.
    Active { connections: usize },
    /// The camera answered for the most recent client.
    Connected { connections: usize },
    Reconnecting { attempt: u32 },
    Stopping,
    Stopped,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Starting => write!(f, "Starting"),
            Self::Listening => write!(f, "Active - Listening"),
            Self::Active { connections } => write!(f, "Active - {connections} connections"),
            Self::Connected { connections } => {
                write!(f, "Connected - {connections} active connections")
            }
            Self::Reconnecting { attempt } => write!(f, "Reconnecting (attempt {attempt})"),
            Self::Stopping => write!(f, "Stopping"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionSnapshot {
    pub id: ConnectionId,
    pub client_address: SocketAddr,
    pub connected_at: Instant,
    pub bytes_transferred: u64,
    pub target_connected: bool,
}

/// Point-in-time view of a session, readable without touching its task.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub camera: CameraRecord,
    pub binding: Binding,
    pub state: SessionState,
    pub connections: Vec<ConnectionSnapshot>,
    pub total_bytes: u64,
    pub reconnecting: bool,
    pub reconnect_attempts: u32,
    pub last_activity: Instant,
}

impl SessionSnapshot {
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn status(&self) -> String {
        self.state.to_string()
    }
}

/// Totals reported when a session ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionSummary {
    pub total_bytes: u64,
    pub connections_handled: u64,
}

// ----------------------------------------------------------------------------
// Connection table entries
// ----------------------------------------------------------------------------

struct ConnectionSlot {
    client_addr: SocketAddr,
    connected_at: Instant,
    bytes_transferred: u64,
    target_connected: bool,
    close_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ConnectionSlot {
    /// Ask the pair to stop. Safe to call more than once.
    fn signal_close(&mut self) {
        if let Some(tx) = self.close_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Wait for the pair task until `deadline`; abort it if it lingers.
    async fn finish_by(mut self, deadline: Instant) {
        self.signal_close();
        if tokio::time::timeout_at(deadline, &mut self.task)
            .await
            .is_err()
        {
            debug!(client = %self.client_addr, "connection pair slow to close, aborting");
        }
    }
}

/// Signal every slot first, then wait for all of them under one shared
/// grace period.
async fn close_slots(mut slots: Vec<ConnectionSlot>) {
    for slot in &mut slots {
        slot.signal_close();
    }
    let deadline = Instant::now() + PAIR_CLOSE_GRACE;
    for slot in slots {
        slot.finish_by(deadline).await;
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ----------------------------------------------------------------------------
// Session task
// ----------------------------------------------------------------------------

pub(crate) struct ForwardingSession {
    camera: CameraRecord,
    camera_id: Arc<str>,
    target_addr: SocketAddr,
    listener: TcpListener,
    binding: Binding,
    config: ForwardConfig,
    dialer: Arc<dyn TargetDialer>,

    connections: BTreeMap<ConnectionId, ConnectionSlot>,
    next_id: u64,
    connections_handled: u64,
    total_bytes: u64,
    last_activity: Instant,
    state: SessionState,

    reconnecting: bool,
    reconnect_attempts: u32,
    reconnect_deadline: Option<Instant>,

    events: broadcast::Sender<ForwardEvent>,
    pair_tx: mpsc::UnboundedSender<PairEvent>,
    pair_rx: mpsc::UnboundedReceiver<PairEvent>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
}

impl ForwardingSession {
    pub(crate) fn new(
        camera: CameraRecord,
        target_addr: SocketAddr,
        listener: TcpListener,
        binding: Binding,
        config: ForwardConfig,
        dialer: Arc<dyn TargetDialer>,
        events: broadcast::Sender<ForwardEvent>,
    ) -> (Self, watch::Receiver<SessionSnapshot>) {
        let (pair_tx, pair_rx) = mpsc::unbounded_channel();
        let now = Instant::now();
        let initial = SessionSnapshot {
            camera: camera.clone(),
            binding,
            state: SessionState::Starting,
            connections: Vec::new(),
            total_bytes: 0,
            reconnecting: false,
            reconnect_attempts: 0,
            last_activity: now,
        };
        let (snapshot_tx, snapshot_rx) = watch::channel(initial);

        let session = Self {
            camera_id: Arc::from(camera.id.as_str()),
            camera,
            target_addr,
            listener,
            binding,
            config,
            dialer,
            connections: BTreeMap::new(),
            next_id: 1,
            connections_handled: 0,
            total_bytes: 0,
            last_activity: now,
            state: SessionState::Starting,
            reconnecting: false,
            reconnect_attempts: 0,
            reconnect_deadline: None,
            events,
            pair_tx,
            pair_rx,
            snapshot_tx,
        };
        (session, snapshot_rx)
    }

    pub(crate) async fn run(mut self, mut shutdown_rx: oneshot::Receiver<()>) -> SessionSummary {
        let period = self.config.health_check_interval;
        let mut health = tokio::time::interval_at(Instant::now() + period, period);
        health.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.set_state(SessionState::Listening);
        info!(camera = %self.camera_id, binding = %self.binding, target = %self.target_addr, "forwarding session running");

        loop {
            let reconnect_deadline = self.reconnect_deadline;
            tokio::select! {
                _ = &mut shutdown_rx => break,
                accepted = self.listener.accept() => self.handle_accept(accepted).await,
                Some(event) = self.pair_rx.recv() => self.handle_pair_event(event),
                _ = health.tick() => self.health_check().await,
                _ = reconnect_timer(reconnect_deadline) => self.reconnect_timer_fired(),
            }
        }

        self.shutdown().await
    }

    fn emit(&self, event: ForwardEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            camera: self.camera.clone(),
            binding: self.binding,
            state: self.state,
            connections: self
                .connections
                .iter()
                .map(|(id, slot)| ConnectionSnapshot {
                    id: *id,
                    client_address: slot.client_addr,
                    connected_at: slot.connected_at,
                    bytes_transferred: slot.bytes_transferred,
                    target_connected: slot.target_connected,
                })
                .collect(),
            total_bytes: self.total_bytes,
            reconnecting: self.reconnecting,
            reconnect_attempts: self.reconnect_attempts,
            last_activity: self.last_activity,
        }
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.snapshot());
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            debug!(camera = %self.camera_id, status = %state, "session status");
        }
        self.state = state;
        self.publish();
    }

    /// State once nothing special is going on.
    fn settled_state(&self) -> SessionState {
        if self.reconnecting {
            SessionState::Reconnecting {
                attempt: self.reconnect_attempts,
            }
        } else if self.connections.is_empty() {
            SessionState::Listening
        } else {
            SessionState::Active {
                connections: self.connections.len(),
            }
        }
    }

    // ------------------------------------------------------------------------
    // Accept
    // ------------------------------------------------------------------------

    async fn handle_accept(&mut self, accepted: io::Result<(TcpStream, SocketAddr)>) {
        let (client, client_addr) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                error!(camera = %self.camera_id, %e, "failed to accept client connection");
                tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                return;
            }
        };

        let id = ConnectionId(self.next_id);
        self.next_id += 1;
        self.connections_handled += 1;
        info!(camera = %self.camera_id, connection = %id, client = %client_addr, "new client connection");

        let (close_tx, close_rx) = oneshot::channel();
        let pair = ConnectionPair {
            id,
            camera_id: self.camera_id.clone(),
            client,
            client_addr,
            target_addr: self.target_addr,
            dialer: self.dialer.clone(),
            connect_timeout: self.config.connect_timeout,
            events: self.pair_tx.clone(),
            close_rx,
        };
        let task = tokio::spawn(pair.run());

        let now = Instant::now();
        self.connections.insert(
            id,
            ConnectionSlot {
                client_addr,
                connected_at: now,
                bytes_transferred: 0,
                target_connected: false,
                close_tx: Some(close_tx),
                task,
            },
        );
        self.last_activity = now;

        self.emit(ForwardEvent::ConnectionEstablished {
            camera_id: self.camera.id.clone(),
            client_address: client_addr.to_string(),
        });
        self.set_state(SessionState::Active {
            connections: self.connections.len(),
        });
    }

    // ------------------------------------------------------------------------
    // Pair events
    // ------------------------------------------------------------------------

    fn handle_pair_event(&mut self, event: PairEvent) {
        let PairEvent { id, kind } = event;
        match kind {
            PairEventKind::TargetConnected => {
                if let Some(slot) = self.connections.get_mut(&id) {
                    slot.target_connected = true;
                }
                self.reconnect_attempts = 0;
                self.last_activity = Instant::now();
                self.set_state(SessionState::Connected {
                    connections: self.connections.len(),
                });
            }
            PairEventKind::Transferred { bytes, direction } => {
                if let Some(slot) = self.connections.get_mut(&id) {
                    slot.bytes_transferred += bytes;
                }
                self.total_bytes += bytes;
                self.last_activity = Instant::now();
                self.emit(ForwardEvent::DataTransferred {
                    camera_id: self.camera.id.clone(),
                    bytes,
                    direction,
                });
                self.publish();
            }
            PairEventKind::TargetFailed { message } => {
                self.emit(ForwardEvent::ForwardingError {
                    camera_id: self.camera.id.clone(),
                    message,
                });
            }
            PairEventKind::Closed { reason } => {
                let Some(slot) = self.connections.remove(&id) else {
                    return;
                };
                debug!(
                    camera = %self.camera_id,
                    connection = %id,
                    client = %slot.client_addr,
                    bytes = slot.bytes_transferred,
                    duration = ?slot.connected_at.elapsed(),
                    ?reason,
                    "connection removed"
                );
                self.emit(ForwardEvent::ConnectionClosed {
                    camera_id: self.camera.id.clone(),
                    client_address: slot.client_addr.to_string(),
                });
                if reason == CloseReason::TargetClosed {
                    self.arm_reconnect();
                }
                let state = self.settled_state();
                self.set_state(state);
            }
        }
    }

    // ------------------------------------------------------------------------
    // Reconnect guard
    // ------------------------------------------------------------------------

    /// Arm the reconnect guard after the camera dropped a live connection.
    ///
    /// The guard only records that the camera went away; the next client
    /// connection is what dials the camera again.
    fn arm_reconnect(&mut self) {
        if !self.camera.enabled || self.reconnecting {
            return;
        }
        self.reconnecting = true;
        self.reconnect_attempts += 1;
        self.reconnect_deadline = Some(Instant::now() + self.config.reconnect_interval);

        let attempt = self.reconnect_attempts;
        if attempt > self.config.max_reconnect_attempts {
            warn!(
                camera = %self.camera_id,
                attempt,
                max = self.config.max_reconnect_attempts,
                "camera keeps dropping connections, exceeded reconnect attempts"
            );
        } else {
            info!(camera = %self.camera_id, attempt, delay = ?self.config.reconnect_interval, "camera disconnected, reconnect guard armed");
        }
        self.emit(ForwardEvent::ReconnectionAttempt {
            camera_id: self.camera.id.clone(),
            attempt,
        });
    }

    fn reconnect_timer_fired(&mut self) {
        self.reconnecting = false;
        self.reconnect_deadline = None;
        debug!(camera = %self.camera_id, "reconnect guard cleared, waiting for next client");
        let state = self.settled_state();
        self.set_state(state);
    }

    // ------------------------------------------------------------------------
    // Health check
    // ------------------------------------------------------------------------

    async fn health_check(&mut self) {
        let now = Instant::now();
        debug!(
            camera = %self.camera_id,
            connections = self.connections.len(),
            bytes = self.total_bytes,
            idle = ?now.saturating_duration_since(self.last_activity),
            status = %self.state,
            "health check"
        );

        let threshold = self.config.inactivity_threshold;
        let stale: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|(_, slot)| {
                slot.bytes_transferred == 0
                    && now.saturating_duration_since(slot.connected_at) > threshold
            })
            .map(|(id, _)| *id)
            .collect();

        if stale.is_empty() {
            return;
        }

        let mut evicted = Vec::with_capacity(stale.len());
        for id in stale {
            let Some(mut slot) = self.connections.remove(&id) else {
                continue;
            };
            warn!(camera = %self.camera_id, connection = %id, client = %slot.client_addr, "removing inactive connection");
            slot.signal_close();
            self.emit(ForwardEvent::ConnectionClosed {
                camera_id: self.camera.id.clone(),
                client_address: slot.client_addr.to_string(),
            });
            evicted.push(slot);
        }
        let state = self.settled_state();
        self.set_state(state);
        close_slots(evicted).await;
    }

    // ------------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------------

    async fn shutdown(&mut self) -> SessionSummary {
        self.set_state(SessionState::Stopping);
        if !self.connections.is_empty() {
            info!(camera = %self.camera_id, connections = self.connections.len(), "closing active connections");
        }

        let connections = std::mem::take(&mut self.connections);
        for (id, slot) in &connections {
            debug!(
                camera = %self.camera_id,
                connection = %id,
                client = %slot.client_addr,
                bytes = slot.bytes_transferred,
                duration = ?slot.connected_at.elapsed(),
                "closing connection"
            );
        }
        close_slots(connections.into_values().collect()).await;

        // Bytes the pairs moved before they saw the close.
        while let Ok(PairEvent { kind, .. }) = self.pair_rx.try_recv() {
            if let PairEventKind::Transferred { bytes, direction } = kind {
                self.total_bytes += bytes;
                self.emit(ForwardEvent::DataTransferred {
                    camera_id: self.camera.id.clone(),
                    bytes,
                    direction,
                });
            }
        }

        let summary = SessionSummary {
            total_bytes: self.total_bytes,
            connections_handled: self.connections_handled,
        };
        info!(
            camera = %self.camera_id,
            bytes = summary.total_bytes,
            connections = summary.connections_handled,
            "session final statistics"
        );
        self.set_state(SessionState::Stopped);
        summary
    }
}

async fn reconnect_timer(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

// ----------------------------------------------------------------------------
// Handle held by the manager
// ----------------------------------------------------------------------------

/// Owner-side handle of a spawned session. Dropping it aborts the task, which
/// drops the listener and every pair with it.
pub(crate) struct SessionHandle {
    camera: CameraRecord,
    snapshot: watch::Receiver<SessionSnapshot>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<SessionSummary>,
}

impl SessionHandle {
    pub(crate) fn spawn(
        session: ForwardingSession,
        snapshot: watch::Receiver<SessionSnapshot>,
    ) -> Self {
        let camera = session.camera.clone();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(session.run(shutdown_rx));
        Self {
            camera,
            snapshot,
            shutdown_tx: Some(shutdown_tx),
            task,
        }
    }

    pub(crate) fn camera(&self) -> &CameraRecord {
        &self.camera
    }

    pub(crate) fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub(crate) fn total_bytes(&self) -> u64 {
        self.snapshot.borrow().total_bytes
    }

    pub(crate) fn connection_count(&self) -> usize {
        self.snapshot.borrow().connections.len()
    }

    pub(crate) fn status(&self) -> String {
        self.snapshot.borrow().status()
    }

    pub(crate) fn binding(&self) -> Binding {
        self.snapshot.borrow().binding
    }

    /// Stop the session and wait until its listener and pairs are gone.
    pub(crate) async fn stop(mut self) -> SessionSummary {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        match (&mut self.task).await {
            Ok(summary) => summary,
            Err(e) => {
                warn!(camera = %self.camera.id, %e, "session task ended abnormally");
                SessionSummary {
                    total_bytes: self.snapshot.borrow().total_bytes,
                    connections_handled: 0,
                }
            }
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
