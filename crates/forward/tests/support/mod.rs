//! Common test utilities and helpers
#![allow(dead_code)]

use std::io;
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::CameraRecord;
use forward::{ForwardConfig, ForwardEvent, TargetDialer};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Mutex, Semaphore};

/// Find an available TCP port for testing
pub fn find_available_port() -> u16 {
    let listener = StdTcpListener::bind("127.0.0.1:0").expect("Failed to bind to random port");
    listener.local_addr().unwrap().port()
}

/// Engine timings shrunk so tests run in well under a second per step.
pub fn fast_config() -> ForwardConfig {
    ForwardConfig {
        connect_timeout: Duration::from_secs(5),
        reconnect_interval: Duration::from_millis(200),
        health_check_interval: Duration::from_secs(60),
        inactivity_threshold: Duration::from_secs(300),
        restart_delay: Duration::from_millis(50),
        restart_all_delay: Duration::from_millis(20),
        vpn_settle_delay: Duration::from_millis(20),
        max_reconnect_attempts: 10,
    }
}

pub fn camera(id: &str, target: SocketAddr, external_port: u16) -> CameraRecord {
    CameraRecord::new(
        id,
        format!("Camera {id}"),
        target.ip().to_string(),
        target.port(),
        external_port,
    )
}

/// Connect to the relay's external port on loopback.
pub async fn connect_client(port: u16) -> TcpStream {
    TcpStream::connect(("127.0.0.1", port))
        .await
        .expect("Failed to connect to relay")
}

/// Wait for a condition to be true, with timeout
pub async fn wait_for<F>(mut condition: F, timeout_ms: u64) -> bool
where
    F: FnMut() -> bool,
{
    let start = std::time::Instant::now();
    let timeout = Duration::from_millis(timeout_ms);

    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    false
}

/// Read until the peer closes, bounded by `timeout_ms`.
pub async fn read_to_close(stream: &mut TcpStream, timeout_ms: u64) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    tokio::time::timeout(
        Duration::from_millis(timeout_ms),
        stream.read_to_end(&mut out),
    )
    .await
    .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "peer never closed"))??;
    Ok(out)
}

/// Read exactly `len` bytes, bounded by `timeout_ms`.
pub async fn read_exact_timeout(
    stream: &mut TcpStream,
    len: usize,
    timeout_ms: u64,
) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    tokio::time::timeout(Duration::from_millis(timeout_ms), stream.read_exact(&mut buf))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "short read"))??;
    Ok(buf)
}

/// Drain events until one matches, bounded by `timeout_ms`.
pub async fn next_matching<F>(
    rx: &mut broadcast::Receiver<ForwardEvent>,
    timeout_ms: u64,
    mut pred: F,
) -> Option<ForwardEvent>
where
    F: FnMut(&ForwardEvent) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
    loop {
        match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(Ok(event)) if pred(&event) => return Some(event),
            Ok(Ok(_)) | Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
            Ok(Err(broadcast::error::RecvError::Closed)) | Err(_) => return None,
        }
    }
}

/// Everything already queued on the receiver.
pub fn drain_events(rx: &mut broadcast::Receiver<ForwardEvent>) -> Vec<ForwardEvent> {
    let mut out = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => out.push(event),
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => return out,
        }
    }
}

// ============================================================================
// Mock camera
// ============================================================================

/// A TCP server standing in for a camera: records everything it receives
/// and answers each read with a fixed response (if any).
pub struct MockCamera {
    pub addr: SocketAddr,
    pub received: Arc<Mutex<Vec<u8>>>,
    pub accepted: Arc<AtomicUsize>,
}

impl MockCamera {
    pub async fn start(response: Option<Vec<u8>>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock camera");
        let addr = listener.local_addr().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));
        let accepted = Arc::new(AtomicUsize::new(0));

        let received_clone = received.clone();
        let accepted_clone = accepted.clone();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                accepted_clone.fetch_add(1, Ordering::SeqCst);
                let received = received_clone.clone();
                let response = response.clone();
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 64 * 1024];
                    loop {
                        match socket.read(&mut buf).await {
                            Ok(0) | Err(_) => break,
                            Ok(n) => {
                                received.lock().await.extend_from_slice(&buf[..n]);
                                if let Some(response) = &response {
                                    if socket.write_all(response).await.is_err() {
                                        break;
                                    }
                                }
                            }
                        }
                    }
                });
            }
        });

        Self {
            addr,
            received,
            accepted,
        }
    }

    pub async fn received(&self) -> Vec<u8> {
        self.received.lock().await.clone()
    }

    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

/// A camera that accepts, pushes `payload`, then closes the connection.
pub async fn start_closing_camera(payload: Vec<u8>) -> (SocketAddr, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind closing camera");
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let accepted_clone = accepted.clone();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            accepted_clone.fetch_add(1, Ordering::SeqCst);
            let _ = socket.write_all(&payload).await;
            let _ = socket.shutdown().await;
        }
    });
    (addr, accepted)
}

/// A camera that accepts and keeps every connection open without reading.
/// Clearing the returned list drops them all at once.
pub async fn start_holding_camera() -> (SocketAddr, Arc<Mutex<Vec<TcpStream>>>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind holding camera");
    let addr = listener.local_addr().unwrap();
    let held = Arc::new(Mutex::new(Vec::new()));
    let held_clone = held.clone();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            held_clone.lock().await.push(socket);
        }
    });
    (addr, held)
}

// ============================================================================
// Dialers
// ============================================================================

/// Dials `target` regardless of the requested address, counting calls.
pub struct RedirectDialer {
    pub target: SocketAddr,
    pub dials: AtomicUsize,
}

impl RedirectDialer {
    pub fn new(target: SocketAddr) -> Arc<Self> {
        Arc::new(Self {
            target,
            dials: AtomicUsize::new(0),
        })
    }

    pub fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TargetDialer for RedirectDialer {
    async fn dial(&self, _addr: SocketAddr) -> io::Result<TcpStream> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        TcpStream::connect(self.target).await
    }
}

/// Holds every dial until [`GatedDialer::open`] is called.
pub struct GatedDialer {
    pub target: SocketAddr,
    gate: Semaphore,
    pub started: AtomicUsize,
}

impl GatedDialer {
    pub fn new(target: SocketAddr) -> Arc<Self> {
        Arc::new(Self {
            target,
            gate: Semaphore::new(0),
            started: AtomicUsize::new(0),
        })
    }

    pub fn open(&self) {
        self.gate.add_permits(Semaphore::MAX_PERMITS / 2);
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TargetDialer for GatedDialer {
    async fn dial(&self, _addr: SocketAddr) -> io::Result<TcpStream> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        TcpStream::connect(self.target).await
    }
}

/// Never completes; the engine's connect timeout has to end it.
pub struct HangingDialer;

#[async_trait]
impl TargetDialer for HangingDialer {
    async fn dial(&self, _addr: SocketAddr) -> io::Result<TcpStream> {
        std::future::pending().await
    }
}

/// Fails every dial with "connection refused".
pub struct RefusingDialer;

#[async_trait]
impl TargetDialer for RefusingDialer {
    async fn dial(&self, _addr: SocketAddr) -> io::Result<TcpStream> {
        Err(io::Error::from(io::ErrorKind::ConnectionRefused))
    }
}

/// A camera that echoes every byte back to the sender.
pub async fn start_echo_camera() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind echo camera");
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut reader, mut writer) = socket.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });
    addr
}
