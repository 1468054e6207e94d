use std::time::Duration;

/// Timing knobs for the forwarding engine.
///
/// The defaults are the production values; tests shrink them.
#[derive(Debug, Clone)]
pub struct ForwardConfig {
    /// Bound on dialling a camera after a client connects.
    pub connect_timeout: Duration,
    /// How long the reconnect guard stays armed after a camera drops.
    pub reconnect_interval: Duration,
    /// Period of the per-session health check.
    pub health_check_interval: Duration,
    /// Zero-byte connections older than this are evicted by the health check.
    pub inactivity_threshold: Duration,
    /// Pause between stop and start in `restart_forwarding`, so the OS
    /// releases the port.
    pub restart_delay: Duration,
    /// Pause between stopping everything and starting again in
    /// `restart_all_forwarding`.
    pub restart_all_delay: Duration,
    /// Settle time after the VPN interface comes up before rebinding.
    pub vpn_settle_delay: Duration,
    /// Reconnect attempts beyond this are logged as a persistent failure.
    pub max_reconnect_attempts: u32,
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            reconnect_interval: Duration::from_secs(5),
            health_check_interval: Duration::from_secs(30),
            inactivity_threshold: Duration::from_secs(300),
            restart_delay: Duration::from_millis(1000),
            restart_all_delay: Duration::from_millis(500),
            vpn_settle_delay: Duration::from_millis(1000),
            max_reconnect_attempts: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_streaming_profile() {
        let cfg = ForwardConfig::default();
        assert_eq!(cfg.connect_timeout, Duration::from_secs(30));
        assert_eq!(cfg.reconnect_interval, Duration::from_secs(5));
        assert_eq!(cfg.health_check_interval, Duration::from_secs(30));
        assert_eq!(cfg.inactivity_threshold, Duration::from_secs(5 * 60));
        assert_eq!(cfg.max_reconnect_attempts, 10);
        assert!(cfg.restart_all_delay < cfg.restart_delay);
    }
}
