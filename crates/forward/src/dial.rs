use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::net::TcpStream;

/// Opens the outbound leg of a connection pair.
///
/// The engine wraps every dial in its own connect timeout, so implementations
/// need not bound the wait themselves.
#[async_trait]
pub trait TargetDialer: Send + Sync + 'static {
    async fn dial(&self, addr: SocketAddr) -> io::Result<TcpStream>;
}

/// Plain TCP connect to the camera's internal address.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpDialer;

#[async_trait]
impl TargetDialer for TcpDialer {
    async fn dial(&self, addr: SocketAddr) -> io::Result<TcpStream> {
        TcpStream::connect(addr).await
    }
}
