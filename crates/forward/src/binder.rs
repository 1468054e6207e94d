//! Listener binding with interface fallback.
//!
//! Binding to the wildcard address is preferred so LAN and VPN peers can both
//! reach the relay, but some environments (sandboxed services, certain VPN
//! driver states) reject wildcard binds. Candidates are tried in order and
//! the first success wins:
//!
//! 1. `0.0.0.0`
//! 2. `[::]`
//! 3. every address the interface provider reports, in enumeration order
//! 4. the VPN tunnel's own address
//! 5. `127.0.0.1`, which leaves the camera reachable only from this host

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use common::InterfaceProvider;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::error::{ForwardError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    AllIpv4,
    AllIpv6,
    SpecificInterface,
    LoopbackOnly,
}

impl fmt::Display for BindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllIpv4 => write!(f, "All IPv4 interfaces"),
            Self::AllIpv6 => write!(f, "All IPv6 interfaces"),
            Self::SpecificInterface => write!(f, "Specific interface only"),
            Self::LoopbackOnly => write!(f, "Loopback only - external access limited"),
        }
    }
}

/// Where a session's listener ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Binding {
    pub addr: SocketAddr,
    pub kind: BindingKind,
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Listening on {} ({})", self.addr, self.kind)
    }
}

/// Bind candidates for `port`, in the order they are tried.
pub fn candidates(
    port: u16,
    interfaces: Option<&dyn InterfaceProvider>,
) -> Vec<(SocketAddr, BindingKind)> {
    let mut out = vec![
        (
            SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port),
            BindingKind::AllIpv4,
        ),
        (
            SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port),
            BindingKind::AllIpv6,
        ),
    ];

    if let Some(provider) = interfaces {
        let mut specific: Vec<IpAddr> = provider.all_addresses();
        if let Some(vpn) = provider.wireguard_address() {
            specific.push(vpn);
        }
        for ip in specific {
            if ip.is_loopback() || ip.is_unspecified() {
                continue;
            }
            let addr = SocketAddr::new(ip, port);
            if out.iter().any(|(a, _)| *a == addr) {
                continue;
            }
            out.push((addr, BindingKind::SpecificInterface));
        }
    }

    out.push((
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port),
        BindingKind::LoopbackOnly,
    ));
    out
}

/// Bind a listener for `port`, falling back through [`candidates`].
pub async fn bind_listener(
    port: u16,
    interfaces: Option<&dyn InterfaceProvider>,
) -> Result<(TcpListener, Binding)> {
    let vpn = interfaces.and_then(|p| p.wireguard_address());
    let mut last_error: Option<std::io::Error> = None;

    for (addr, kind) in candidates(port, interfaces) {
        match TcpListener::bind(addr).await {
            Ok(listener) => {
                // Port 0 asks the OS to pick; report what it chose.
                let addr = listener.local_addr().unwrap_or(addr);
                let binding = Binding { addr, kind };
                match kind {
                    BindingKind::LoopbackOnly => {
                        warn!(%addr, "only bound to localhost - external access limited")
                    }
                    BindingKind::SpecificInterface if Some(addr.ip()) == vpn => {
                        info!(%addr, "bound to VPN tunnel interface")
                    }
                    _ => info!(%addr, %kind, "listener bound"),
                }
                return Ok((listener, binding));
            }
            Err(e) => {
                if kind == BindingKind::AllIpv6 {
                    warn!(port, %e, "failed to bind wildcard addresses, trying specific interfaces");
                } else {
                    debug!(%addr, %e, "bind attempt failed");
                }
                last_error = Some(e);
            }
        }
    }

    Err(ForwardError::Bind {
        port,
        message: last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no bind candidates".to_string()),
    })
}
