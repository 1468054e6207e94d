//! Camera configuration file.
//!
//! ```toml
//! [relay]
//! connect_timeout_secs = 30
//! inactivity_threshold_secs = 300
//!
//! [[camera]]
//! id = "cam-a"
//! name = "Front door"
//! internal_host = "192.168.1.64"
//! internal_port = 554
//! external_port = 8551
//! ```
//!
//! The relay only reads this file; cameras are managed elsewhere.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use common::monitor::DEFAULT_MONITOR_INTERVAL;
use common::{CameraRecord, Error, Result};
use forward::ForwardConfig;
use serde::Deserialize;

const CONFIG_DIR_NAME: &str = "camrelay";
const CONFIG_FILE_NAME: &str = "cameras.toml";

/// Overrides for the engine timings. Unset fields keep the defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelaySection {
    pub connect_timeout_secs: Option<u64>,
    pub reconnect_interval_secs: Option<u64>,
    pub health_check_interval_secs: Option<u64>,
    pub inactivity_threshold_secs: Option<u64>,
    pub max_reconnect_attempts: Option<u32>,
    pub restart_delay_ms: Option<u64>,
    pub monitor_interval_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelayFile {
    #[serde(default)]
    pub relay: RelaySection,
    #[serde(default, rename = "camera")]
    pub cameras: Vec<CameraRecord>,
}

impl RelayFile {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let file: RelayFile =
            toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        file.validate()?;
        Ok(file)
    }

    fn validate(&self) -> Result<()> {
        let mut ids = HashSet::new();
        let mut ports: HashMap<u16, &str> = HashMap::new();

        for camera in &self.cameras {
            camera.validate()?;
            if !ids.insert(camera.id.as_str()) {
                return Err(Error::Config(format!("duplicate camera id {}", camera.id)));
            }
            if !camera.enabled {
                continue;
            }
            if let Some(other) = ports.insert(camera.external_port, &camera.id) {
                return Err(Error::Config(format!(
                    "duplicate external port {} used by {} and {}",
                    camera.external_port, other, camera.id
                )));
            }
        }
        Ok(())
    }

    pub fn enabled_cameras(&self) -> impl Iterator<Item = &CameraRecord> {
        self.cameras.iter().filter(|c| c.enabled)
    }

    pub fn forward_config(&self) -> ForwardConfig {
        let r = &self.relay;
        let mut config = ForwardConfig::default();
        if let Some(secs) = r.connect_timeout_secs {
            config.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = r.reconnect_interval_secs {
            config.reconnect_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = r.health_check_interval_secs {
            config.health_check_interval = Duration::from_secs(secs.max(1));
        }
        if let Some(secs) = r.inactivity_threshold_secs {
            config.inactivity_threshold = Duration::from_secs(secs);
        }
        if let Some(max) = r.max_reconnect_attempts {
            config.max_reconnect_attempts = max;
        }
        if let Some(ms) = r.restart_delay_ms {
            config.restart_delay = Duration::from_millis(ms);
        }
        config
    }

    pub fn monitor_interval(&self) -> Duration {
        self.relay
            .monitor_interval_secs
            .map(|secs| Duration::from_secs(secs.max(1)))
            .unwrap_or(DEFAULT_MONITOR_INTERVAL)
    }
}

/// `<config dir>/camrelay/cameras.toml`, or `./cameras.toml` when the
/// platform has no config directory.
pub fn default_config_path() -> PathBuf {
    match dirs::config_dir() {
        Some(dir) => dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME),
        None => PathBuf::from(CONFIG_FILE_NAME),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_CAMERAS: &str = r#"
[relay]
connect_timeout_secs = 10
restart_delay_ms = 250

[[camera]]
id = "cam-a"
name = "Front door"
internal_host = "192.168.1.64"
internal_port = 554
external_port = 8551

[[camera]]
id = "cam-b"
name = "Garage"
internal_host = "192.168.1.65"
internal_port = 554
external_port = 8552
enabled = false
"#;

    #[test]
    fn parses_cameras_and_overrides() {
        let file = RelayFile::parse(TWO_CAMERAS).unwrap();
        assert_eq!(file.cameras.len(), 2);
        assert!(file.cameras[0].enabled);
        assert!(!file.cameras[1].enabled);
        assert_eq!(file.enabled_cameras().count(), 1);

        let config = file.forward_config();
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.restart_delay, Duration::from_millis(250));
        // Untouched fields keep their defaults.
        assert_eq!(config.reconnect_interval, Duration::from_secs(5));
        assert_eq!(file.monitor_interval(), DEFAULT_MONITOR_INTERVAL);
    }

    #[test]
    fn empty_file_is_valid() {
        let file = RelayFile::parse("").unwrap();
        assert!(file.cameras.is_empty());
    }

    #[test]
    fn duplicate_enabled_ports_are_rejected() {
        let text = TWO_CAMERAS.replace("enabled = false", "");
        let text = text.replace("8552", "8551");
        let err = RelayFile::parse(&text).unwrap_err();
        assert!(err.to_string().contains("duplicate external port 8551"), "{err}");
    }

    #[test]
    fn disabled_camera_may_share_a_port() {
        let text = TWO_CAMERAS.replace("8552", "8551");
        assert!(RelayFile::parse(&text).is_ok());
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let text = TWO_CAMERAS.replace("cam-b", "cam-a");
        let err = RelayFile::parse(&text).unwrap_err();
        assert!(err.to_string().contains("duplicate camera id"), "{err}");
    }

    #[test]
    fn invalid_camera_is_rejected() {
        let text = TWO_CAMERAS.replace("192.168.1.64", "frontdoor.local");
        assert!(matches!(
            RelayFile::parse(&text),
            Err(Error::InvalidCamera { .. })
        ));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let text = format!("{TWO_CAMERAS}\n[relay_extra]\nfoo = 1\n");
        assert!(matches!(RelayFile::parse(&text), Err(Error::Config(_))));
    }

    #[test]
    fn default_path_ends_with_file_name() {
        assert!(default_config_path().ends_with(CONFIG_FILE_NAME));
    }
}
