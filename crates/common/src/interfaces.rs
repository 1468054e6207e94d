//! Network interface discovery.
//!
//! The relay engine only needs a handful of facts about the host's network:
//! which local addresses it could bind to, and whether the VPN tunnel is up
//! and at which address. [`InterfaceProvider`] is that seam; the engine
//! consumes it through `Arc<dyn InterfaceProvider>`.

use std::net::{IpAddr, Ipv4Addr};

use tracing::debug;

/// Source of local address information for listener binding.
pub trait InterfaceProvider: Send + Sync + 'static {
    /// Addresses of all active, non-loopback interfaces, in enumeration order.
    fn all_addresses(&self) -> Vec<IpAddr>;

    /// The VPN tunnel's own address, if a tunnel interface is present.
    fn wireguard_address(&self) -> Option<IpAddr>;

    fn is_wireguard_active(&self) -> bool;

    /// One-line summary for logs.
    fn interface_status(&self) -> String {
        let active = self.all_addresses().len();
        match (self.is_wireguard_active(), self.wireguard_address()) {
            (true, Some(addr)) => {
                format!("Active interfaces: {active} | WireGuard: ACTIVE ({addr})")
            }
            (true, None) => format!("Active interfaces: {active} | WireGuard: ACTIVE"),
            _ => format!("Active interfaces: {active} | WireGuard: INACTIVE"),
        }
    }
}

/// Whether an interface name looks like a WireGuard (or generic tunnel) device.
pub fn is_wireguard_name(name: &str) -> bool {
    let name = name.to_lowercase();
    name.starts_with("wg")
        || name.contains("wireguard")
        || name.starts_with("utun")
        || name.contains("tun")
}

// ---------------------------------------------------------------------------
// SystemInterfaces
// ---------------------------------------------------------------------------

/// [`InterfaceProvider`] backed by the operating system's interface table.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemInterfaces;

impl SystemInterfaces {
    pub fn new() -> Self {
        Self
    }

    fn interfaces() -> Vec<get_if_addrs::Interface> {
        match get_if_addrs::get_if_addrs() {
            Ok(ifaces) => ifaces,
            Err(e) => {
                debug!(%e, "failed to enumerate network interfaces");
                Vec::new()
            }
        }
    }
}

impl InterfaceProvider for SystemInterfaces {
    fn all_addresses(&self) -> Vec<IpAddr> {
        Self::interfaces()
            .into_iter()
            .filter(|iface| !iface.is_loopback())
            .map(|iface| iface.ip())
            .filter(IpAddr::is_ipv4)
            .collect()
    }

    fn wireguard_address(&self) -> Option<IpAddr> {
        Self::interfaces()
            .into_iter()
            .filter(|iface| is_wireguard_name(&iface.name))
            .map(|iface| iface.ip())
            .find(IpAddr::is_ipv4)
    }

    fn is_wireguard_active(&self) -> bool {
        // get_if_addrs only reports interfaces that carry an address, which is
        // the closest portable signal for "up and running".
        Self::interfaces()
            .iter()
            .any(|iface| is_wireguard_name(&iface.name))
    }
}

// ---------------------------------------------------------------------------
// StaticInterfaces
// ---------------------------------------------------------------------------

/// Fixed answers, for hosts without interface discovery and for tests.
#[derive(Debug, Clone, Default)]
pub struct StaticInterfaces {
    pub addresses: Vec<IpAddr>,
    pub wireguard: Option<IpAddr>,
}

impl StaticInterfaces {
    pub fn new(addresses: Vec<IpAddr>, wireguard: Option<IpAddr>) -> Self {
        Self {
            addresses,
            wireguard,
        }
    }

    /// Only the loopback address, with no VPN.
    pub fn loopback() -> Self {
        Self::new(vec![IpAddr::V4(Ipv4Addr::LOCALHOST)], None)
    }
}

impl InterfaceProvider for StaticInterfaces {
    fn all_addresses(&self) -> Vec<IpAddr> {
        self.addresses.clone()
    }

    fn wireguard_address(&self) -> Option<IpAddr> {
        self.wireguard
    }

    fn is_wireguard_active(&self) -> bool {
        self.wireguard.is_some()
    }
}
