use std::fmt;
use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A camera exposed through the relay: the internal `ip:port` it lives at and
/// the external port the relay listens on for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraRecord {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub internal_host: String,
    pub internal_port: u16,
    pub external_port: u16,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl CameraRecord {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        internal_host: impl Into<String>,
        internal_port: u16,
        external_port: u16,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            internal_host: internal_host.into(),
            internal_port,
            external_port,
            enabled: true,
        }
    }

    /// Check that the record is usable for forwarding.
    ///
    /// The internal host must be an IP literal; cameras are addressed on the
    /// private network directly, never through name resolution.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| Error::InvalidCamera {
            id: self.id.clone(),
            reason: reason.to_string(),
        };

        if self.id.trim().is_empty() {
            return Err(invalid("id is empty"));
        }
        if self.name.trim().is_empty() {
            return Err(invalid("name is empty"));
        }
        if self.internal_host.parse::<IpAddr>().is_err() {
            return Err(invalid("internal host is not an IP address"));
        }
        if self.internal_port == 0 {
            return Err(invalid("internal port must be between 1 and 65535"));
        }
        if self.external_port == 0 {
            return Err(invalid("external port must be between 1 and 65535"));
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// The camera's internal socket address, if the host parses.
    pub fn internal_addr(&self) -> Option<SocketAddr> {
        let ip = self.internal_host.parse::<IpAddr>().ok()?;
        Some(SocketAddr::new(ip, self.internal_port))
    }

    /// Name for log lines, falling back to the id.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

impl fmt::Display for CameraRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] {}:{} -> :{}",
            self.display_name(),
            self.id,
            self.internal_host,
            self.internal_port,
            self.external_port
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera() -> CameraRecord {
        CameraRecord::new("cam-a", "Front door", "192.0.2.10", 554, 8551)
    }

    #[test]
    fn valid_record_passes() {
        assert!(camera().validate().is_ok());
        assert_eq!(
            camera().internal_addr(),
            Some("192.0.2.10:554".parse().unwrap())
        );
    }

    #[test]
    fn empty_id_is_rejected() {
        let mut cam = camera();
        cam.id = "  ".into();
        assert!(matches!(cam.validate(), Err(Error::InvalidCamera { .. })));
    }

    #[test]
    fn hostname_is_rejected() {
        let mut cam = camera();
        cam.internal_host = "camera.local".into();
        assert!(!cam.is_valid());
        assert!(cam.internal_addr().is_none());
    }

    #[test]
    fn zero_ports_are_rejected() {
        let mut cam = camera();
        cam.internal_port = 0;
        assert!(!cam.is_valid());

        let mut cam = camera();
        cam.external_port = 0;
        assert!(!cam.is_valid());
    }

    #[test]
    fn ipv6_internal_host_is_accepted() {
        let mut cam = camera();
        cam.internal_host = "fd00::10".into();
        assert!(cam.is_valid());
        assert_eq!(cam.internal_addr().map(|a| a.port()), Some(554));
    }

    #[test]
    fn display_includes_route() {
        let text = camera().to_string();
        assert_eq!(text, "Front door [cam-a] 192.0.2.10:554 -> :8551");
    }
}
