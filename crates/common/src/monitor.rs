use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::interfaces::InterfaceProvider;

/// Default polling period for [`run_interface_monitor`].
pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_secs(2);

/// A change in the host's network configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceEvent {
    /// The set of active interface addresses changed.
    InterfacesChanged,
    /// The VPN tunnel came up (`true`) or went down (`false`).
    WireGuardStateChanged(bool),
}

/// What the monitor remembers between polls.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterfaceSnapshot {
    addresses: Vec<IpAddr>,
    wireguard_active: bool,
}

impl InterfaceSnapshot {
    pub fn capture<P: InterfaceProvider + ?Sized>(provider: &P) -> Self {
        let mut addresses = provider.all_addresses();
        addresses.sort();
        Self {
            addresses,
            wireguard_active: provider.is_wireguard_active(),
        }
    }

    /// Events describing the transition from `self` to `next`.
    pub fn diff(&self, next: &InterfaceSnapshot) -> Vec<InterfaceEvent> {
        let mut events = Vec::new();
        if self.addresses != next.addresses {
            events.push(InterfaceEvent::InterfacesChanged);
        }
        if self.wireguard_active != next.wireguard_active {
            events.push(InterfaceEvent::WireGuardStateChanged(next.wireguard_active));
        }
        events
    }
}

/// Poll `provider` every `interval`, diff against the previous state, and
/// send [`InterfaceEvent`]s through the channel.
///
/// Returns when the receiver is dropped.
pub async fn run_interface_monitor<P: InterfaceProvider + ?Sized>(
    provider: Arc<P>,
    interval: Duration,
    tx: mpsc::UnboundedSender<InterfaceEvent>,
) {
    let mut previous = InterfaceSnapshot::capture(provider.as_ref());
    info!(status = %provider.interface_status(), "started network interface monitoring");

    loop {
        tokio::time::sleep(interval).await;

        let current = InterfaceSnapshot::capture(provider.as_ref());
        let events = previous.diff(&current);
        previous = current;

        for event in events {
            debug!(?event, "network interface change detected");
            if tx.send(event).is_err() {
                debug!("interface monitor stopping: channel closed");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn snapshot(addrs: &[&str], wg: bool) -> InterfaceSnapshot {
        let mut addresses: Vec<IpAddr> = addrs.iter().map(|a| a.parse().unwrap()).collect();
        addresses.sort();
        InterfaceSnapshot {
            addresses,
            wireguard_active: wg,
        }
    }

    #[test]
    fn identical_snapshots_produce_no_events() {
        let a = snapshot(&["192.168.1.5"], false);
        assert!(a.diff(&a.clone()).is_empty());
    }

    #[test]
    fn address_order_does_not_matter() {
        struct Fixed(Vec<IpAddr>);
        impl InterfaceProvider for Fixed {
            fn all_addresses(&self) -> Vec<IpAddr> {
                self.0.clone()
            }
            fn wireguard_address(&self) -> Option<IpAddr> {
                None
            }
            fn is_wireguard_active(&self) -> bool {
                false
            }
        }
        let a: IpAddr = "10.0.0.1".parse().unwrap();
        let b: IpAddr = "192.168.1.5".parse().unwrap();
        let first = InterfaceSnapshot::capture(&Fixed(vec![a, b]));
        let second = InterfaceSnapshot::capture(&Fixed(vec![b, a]));
        assert!(first.diff(&second).is_empty());
    }

    #[test]
    fn vpn_coming_up_reports_both_changes() {
        let before = snapshot(&["192.168.1.5"], false);
        let after = snapshot(&["192.168.1.5", "10.8.0.2"], true);
        assert_eq!(
            before.diff(&after),
            vec![
                InterfaceEvent::InterfacesChanged,
                InterfaceEvent::WireGuardStateChanged(true)
            ]
        );
    }

    #[test]
    fn vpn_going_down_is_reported() {
        let before = snapshot(&["192.168.1.5"], true);
        let after = snapshot(&["192.168.1.5"], false);
        assert_eq!(
            before.diff(&after),
            vec![InterfaceEvent::WireGuardStateChanged(false)]
        );
    }

    /// Provider whose VPN state can be flipped from the test.
    struct Toggle(Mutex<bool>);

    impl InterfaceProvider for Toggle {
        fn all_addresses(&self) -> Vec<IpAddr> {
            vec!["192.168.1.5".parse().unwrap()]
        }
        fn wireguard_address(&self) -> Option<IpAddr> {
            None
        }
        fn is_wireguard_active(&self) -> bool {
            *self.0.lock().unwrap()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn monitor_sends_vpn_transition() {
        let provider = Arc::new(Toggle(Mutex::new(false)));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_interface_monitor(
            provider.clone(),
            Duration::from_secs(2),
            tx,
        ));

        // Let the monitor take its baseline before flipping the state.
        tokio::task::yield_now().await;
        *provider.0.lock().unwrap() = true;

        let event = rx.recv().await;
        assert_eq!(event, Some(InterfaceEvent::WireGuardStateChanged(true)));

        drop(rx);
        *provider.0.lock().unwrap() = false;
        // The next send fails and the loop exits.
        handle.await.unwrap();
    }
}
