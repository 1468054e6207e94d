//! Socket options for latency-sensitive video relaying.
//!
//! RTSP/RTP suffers from Nagle coalescing and from default buffer sizes that
//! are tuned for bulk transfer. Every socket that takes part in a relay, on
//! both the client and the camera side, goes through
//! [`configure_for_low_latency_streaming`]. Failures are logged and ignored:
//! a socket with default options still relays correctly.
//!
//! Tokio sockets are always direct connections, so unlike GUI network stacks
//! there is no proxy setting to clear.

use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tokio::net::TcpStream;
use tracing::{debug, trace};

/// Kernel send/receive buffer size requested for relay sockets.
pub const SOCKET_BUFFER_SIZE: usize = 256 * 1024;

/// Size of the userspace read chunk used by the relay loop.
pub const RELAY_CHUNK_SIZE: usize = 128 * 1024;

/// IPTOS_LOWDELAY.
#[cfg(any(target_os = "linux", target_os = "macos"))]
const TOS_LOW_DELAY: u32 = 0x10;

const KEEPALIVE_TIME: Duration = Duration::from_secs(60);

#[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);

pub fn configure_for_low_latency_streaming(stream: &TcpStream) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(%e, "failed to set TCP_NODELAY");
    }

    let socket = SockRef::from(stream);

    let keepalive = TcpKeepalive::new().with_time(KEEPALIVE_TIME);
    #[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
    let keepalive = keepalive.with_interval(KEEPALIVE_INTERVAL);
    if let Err(e) = socket.set_tcp_keepalive(&keepalive) {
        debug!(%e, "failed to enable TCP keep-alive");
    }

    if let Err(e) = socket.set_recv_buffer_size(SOCKET_BUFFER_SIZE) {
        debug!(%e, "failed to set SO_RCVBUF");
    }
    if let Err(e) = socket.set_send_buffer_size(SOCKET_BUFFER_SIZE) {
        debug!(%e, "failed to set SO_SNDBUF");
    }

    #[cfg(any(target_os = "linux", target_os = "macos"))]
    if matches!(stream.local_addr(), Ok(addr) if addr.is_ipv4()) {
        if let Err(e) = socket.set_tos(TOS_LOW_DELAY) {
            debug!(%e, "failed to set IP_TOS low-delay");
        }
    }

    trace!("socket tuned for streaming");
}
