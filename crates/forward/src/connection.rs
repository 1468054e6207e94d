//! One accepted client and its outbound camera connection.
//!
//! A pair runs as its own task and talks to the owning session only through
//! [`PairEvent`]s, so the session stays the single owner of its connection
//! table. Writes never block the read side of the other direction: bytes the
//! destination cannot take yet are queued and the source is not read again
//! until the queue drains.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::buffer::PreConnectBuffer;
use crate::dial::TargetDialer;
use crate::event::Direction;
use crate::sniff::{self, PayloadKind};
use crate::tuning::{self, RELAY_CHUNK_SIZE};

/// Minimum spacing of the per-direction "data forwarded" debug line.
const TRANSFER_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// Session-local connection identifier. Allocated from a counter, never
/// reused while the session lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Why a pair finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Client hung up or its socket failed.
    ClientClosed,
    /// Camera hung up or its socket failed after it had connected.
    TargetClosed,
    /// The camera did not answer within the connect timeout.
    ConnectTimeout,
    /// The camera refused or was unreachable.
    ConnectFailed,
    /// The session asked the pair to stop.
    Shutdown,
}

#[derive(Debug)]
pub(crate) struct PairEvent {
    pub id: ConnectionId,
    pub kind: PairEventKind,
}

#[derive(Debug)]
pub(crate) enum PairEventKind {
    TargetConnected,
    /// Bytes the destination socket accepted.
    Transferred { bytes: u64, direction: Direction },
    TargetFailed { message: String },
    Closed { reason: CloseReason },
}

pub(crate) struct ConnectionPair {
    pub id: ConnectionId,
    pub camera_id: Arc<str>,
    pub client: TcpStream,
    pub client_addr: SocketAddr,
    pub target_addr: SocketAddr,
    pub dialer: Arc<dyn TargetDialer>,
    pub connect_timeout: Duration,
    pub events: mpsc::UnboundedSender<PairEvent>,
    pub close_rx: oneshot::Receiver<()>,
}

impl ConnectionPair {
    pub(crate) async fn run(self) {
        let ConnectionPair {
            id,
            camera_id,
            client,
            client_addr,
            target_addr,
            dialer,
            connect_timeout,
            events,
            mut close_rx,
        } = self;

        let mut relay = Relay {
            id,
            camera_id: &camera_id,
            events,
            last_log: [None, None],
        };

        tuning::configure_for_low_latency_streaming(&client);
        let mut chunk = vec![0u8; RELAY_CHUNK_SIZE];
        let mut pre_connect = PreConnectBuffer::new();

        debug!(camera = %camera_id, connection = %id, client = %client_addr, target = %target_addr, "connecting to camera");

        let dial = tokio::time::timeout(connect_timeout, dialer.dial(target_addr));
        tokio::pin!(dial);

        // ----------------------------------------------------------------
        // Waiting for the camera
        // ----------------------------------------------------------------

        let target = loop {
            tokio::select! {
                _ = &mut close_rx => {
                    relay.closed(CloseReason::Shutdown);
                    return;
                }
                result = &mut dial => match result {
                    Ok(Ok(stream)) => break stream,
                    Ok(Err(e)) => {
                        error!(camera = %camera_id, target = %target_addr, %e, "camera connection failed: {}", describe_connect_error(&e));
                        relay.send(PairEventKind::TargetFailed {
                            message: format!("Camera connection failed: {e}"),
                        });
                        relay.closed(CloseReason::ConnectFailed);
                        return;
                    }
                    Err(_) => {
                        debug!(camera = %camera_id, target = %target_addr, "camera connect timed out, aborting client");
                        relay.closed(CloseReason::ConnectTimeout);
                        return;
                    }
                },
                ready = client.readable() => {
                    if let Err(e) = ready {
                        debug!(camera = %camera_id, %e, "client socket error before camera connected");
                        relay.closed(CloseReason::ClientClosed);
                        return;
                    }
                    match client.try_read(&mut chunk) {
                        Ok(0) => {
                            info!(camera = %camera_id, client = %client_addr, "client disconnected before camera answered");
                            relay.closed(CloseReason::ClientClosed);
                            return;
                        }
                        Ok(n) => {
                            let dropped = pre_connect.push(&chunk[..n]);
                            if dropped > 0 {
                                warn!(camera = %camera_id, dropped, total_dropped = pre_connect.discarded(), kept = pre_connect.len(), "pre-connect buffer overflow, dropped oldest client data");
                            }
                            debug!(camera = %camera_id, bytes = n, buffered = pre_connect.len(), "buffered client data until camera connects");
                        }
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                        Err(e) => {
                            debug!(camera = %camera_id, %e, "client read failed before camera connected");
                            relay.closed(CloseReason::ClientClosed);
                            return;
                        }
                    }
                }
            }
        };

        tuning::configure_for_low_latency_streaming(&target);
        info!(camera = %camera_id, client = %client_addr, target = %target_addr, "connected to camera");
        relay.send(PairEventKind::TargetConnected);

        // ----------------------------------------------------------------
        // Relaying
        // ----------------------------------------------------------------

        let mut to_target = BytesMut::from(&pre_connect.take()[..]);
        let mut to_client = BytesMut::new();
        if !to_target.is_empty() {
            info!(camera = %camera_id, bytes = to_target.len(), dropped = pre_connect.discarded(), "flushing buffered client data to camera");
            relay.drain(&target, &mut to_target, Direction::ClientToTarget);
        }

        let reason = loop {
            tokio::select! {
                _ = &mut close_rx => break CloseReason::Shutdown,
                ready = target.writable(), if !to_target.is_empty() => {
                    if ready.is_ok() {
                        relay.drain(&target, &mut to_target, Direction::ClientToTarget);
                    } else {
                        to_target.clear();
                    }
                }
                ready = client.writable(), if !to_client.is_empty() => {
                    if ready.is_ok() {
                        relay.drain(&client, &mut to_client, Direction::TargetToClient);
                    } else {
                        to_client.clear();
                    }
                }
                ready = client.readable(), if to_target.is_empty() => {
                    if ready.is_err() {
                        break CloseReason::ClientClosed;
                    }
                    if let Some(reason) = relay.forward(&client, &target, &mut chunk, &mut to_target, Direction::ClientToTarget) {
                        break reason;
                    }
                }
                ready = target.readable(), if to_client.is_empty() => {
                    if ready.is_err() {
                        break CloseReason::TargetClosed;
                    }
                    if let Some(reason) = relay.forward(&target, &client, &mut chunk, &mut to_client, Direction::TargetToClient) {
                        break reason;
                    }
                }
            }
        };

        // Camera side first.
        drop(target);
        drop(client);

        match reason {
            CloseReason::TargetClosed => {
                info!(camera = %camera_id, client = %client_addr, "camera closed the connection")
            }
            CloseReason::ClientClosed => {
                info!(camera = %camera_id, client = %client_addr, "client closed the connection")
            }
            _ => debug!(camera = %camera_id, client = %client_addr, ?reason, "connection pair closed"),
        }
        relay.closed(reason);
    }
}

fn describe_connect_error(e: &io::Error) -> &'static str {
    match e.kind() {
        io::ErrorKind::ConnectionRefused => "camera refused the connection",
        io::ErrorKind::TimedOut => "connection timed out",
        io::ErrorKind::AddrNotAvailable => "camera address not available",
        io::ErrorKind::PermissionDenied => "connection not permitted",
        _ => "network error",
    }
}

/// Per-pair reporting and I/O helpers.
struct Relay<'a> {
    id: ConnectionId,
    camera_id: &'a str,
    events: mpsc::UnboundedSender<PairEvent>,
    last_log: [Option<Instant>; 2],
}

impl Relay<'_> {
    fn send(&self, kind: PairEventKind) {
        // The session may already be gone during teardown.
        let _ = self.events.send(PairEvent { id: self.id, kind });
    }

    fn closed(&self, reason: CloseReason) {
        self.send(PairEventKind::Closed { reason });
    }

    /// Read once from `src` and pass it on to `dst`, queueing whatever `dst`
    /// does not accept. Returns the close reason when `src` is finished.
    fn forward(
        &mut self,
        src: &TcpStream,
        dst: &TcpStream,
        chunk: &mut [u8],
        pending: &mut BytesMut,
        direction: Direction,
    ) -> Option<CloseReason> {
        let source_gone = match direction {
            Direction::ClientToTarget => CloseReason::ClientClosed,
            Direction::TargetToClient => CloseReason::TargetClosed,
        };

        let n = match src.try_read(chunk) {
            Ok(0) => return Some(source_gone),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return None,
            Err(e) => {
                warn!(camera = self.camera_id, %direction, %e, "read failed");
                return Some(source_gone);
            }
        };
        let data = &chunk[..n];
        self.log_payload(data, direction);

        match dst.try_write(data) {
            Ok(written) => {
                self.transferred(written, direction);
                if written < n {
                    pending.extend_from_slice(&data[written..]);
                    debug!(camera = self.camera_id, %direction, queued = n - written, "destination buffer full, queued remainder");
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                pending.extend_from_slice(data);
            }
            Err(e) => {
                error!(camera = self.camera_id, %direction, bytes = n, %e, "write failed, dropping data");
            }
        }
        None
    }

    /// Push queued bytes into `dst` as far as it will take them.
    fn drain(&mut self, dst: &TcpStream, pending: &mut BytesMut, direction: Direction) {
        match dst.try_write(pending) {
            Ok(written) => {
                pending.advance(written);
                self.transferred(written, direction);
                if !pending.is_empty() {
                    debug!(camera = self.camera_id, %direction, remaining = pending.len(), "partial flush of queued data");
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => {
                error!(camera = self.camera_id, %direction, bytes = pending.len(), %e, "failed to flush queued data");
                pending.clear();
            }
        }
    }

    fn transferred(&mut self, bytes: usize, direction: Direction) {
        if bytes == 0 {
            return;
        }
        self.send(PairEventKind::Transferred {
            bytes: bytes as u64,
            direction,
        });

        let slot = &mut self.last_log[direction as usize];
        let now = Instant::now();
        let due = match *slot {
            Some(at) => now.duration_since(at) >= TRANSFER_LOG_INTERVAL,
            None => true,
        };
        if due {
            *slot = Some(now);
            debug!(camera = self.camera_id, %direction, bytes, "data forwarded");
        }
    }

    fn log_payload(&self, data: &[u8], direction: Direction) {
        match sniff::classify(data) {
            PayloadKind::Rtsp => {
                info!(camera = self.camera_id, %direction, bytes = data.len(), "RTSP: {}", sniff::rtsp_preview(data))
            }
            PayloadKind::InterleavedRtp { channel, length } => {
                debug!(camera = self.camera_id, %direction, channel, length, "interleaved RTP/RTCP")
            }
            PayloadKind::Binary if data.len() > sniff::BINARY_LOG_THRESHOLD => {
                debug!(camera = self.camera_id, %direction, bytes = data.len(), "binary data")
            }
            PayloadKind::Binary => {}
        }
    }
}
