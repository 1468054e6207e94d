use std::collections::HashMap;
use std::sync::Arc;

use common::{CameraRecord, InterfaceEvent, InterfaceProvider};
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};

use crate::binder::bind_listener;
use crate::config::ForwardConfig;
use crate::dial::{TargetDialer, TcpDialer};
use crate::error::{ForwardError, Result};
use crate::event::ForwardEvent;
use crate::session::{ForwardingSession, SessionHandle, SessionSnapshot};

/// Buffered events per subscriber before a slow reader starts lagging.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Owns every camera's forwarding session.
///
/// At most one session exists per camera id, and no two sessions share an
/// external port. Queries read the sessions' published snapshots and never
/// wait on a session task.
pub struct ForwardManager {
    sessions: HashMap<String, SessionHandle>,
    config: ForwardConfig,
    interfaces: Option<Arc<dyn InterfaceProvider>>,
    dialer: Arc<dyn TargetDialer>,
    events: broadcast::Sender<ForwardEvent>,
}

impl ForwardManager {
    pub fn new(config: ForwardConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            sessions: HashMap::new(),
            config,
            interfaces: None,
            dialer: Arc::new(TcpDialer),
            events,
        }
    }

    pub fn with_interfaces(mut self, interfaces: Arc<dyn InterfaceProvider>) -> Self {
        self.interfaces = Some(interfaces);
        self
    }

    /// Replace how camera connections are opened.
    pub fn with_dialer(mut self, dialer: Arc<dyn TargetDialer>) -> Self {
        self.dialer = dialer;
        self
    }

    pub fn config(&self) -> &ForwardConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ForwardEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: ForwardEvent) {
        let _ = self.events.send(event);
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Start forwarding `camera.external_port` to the camera.
    ///
    /// An existing session for the same camera is stopped first.
    #[instrument(name = "start_forwarding", skip(self, camera), fields(camera = %camera.id, port = camera.external_port))]
    pub async fn start_forwarding(&mut self, camera: CameraRecord) -> Result<()> {
        if let Err(e) = camera.validate() {
            error!(%e, "refusing to forward invalid camera");
            return Err(e.into());
        }
        if !camera.enabled {
            warn!("refusing to forward disabled camera");
            return Err(ForwardError::InvalidCamera(format!(
                "camera {} is disabled",
                camera.id
            )));
        }
        let target_addr = camera.internal_addr().ok_or_else(|| {
            ForwardError::InvalidCamera(format!(
                "camera {} has no usable internal address",
                camera.id
            ))
        })?;

        let port = camera.external_port;
        if let Some(owner) = self.port_owner(port, Some(camera.id.as_str())) {
            error!(port, owner, "external port already in use by another camera");
            self.emit(ForwardEvent::ForwardingError {
                camera_id: camera.id.clone(),
                message: format!("Port {port} already in use"),
            });
            return Err(ForwardError::PortInUse(port));
        }

        if self.sessions.contains_key(&camera.id) {
            info!("replacing existing session");
            self.stop_forwarding(&camera.id).await;
        }

        info!(record = %camera, "starting port forwarding");
        let (listener, binding) = match bind_listener(port, self.interfaces.as_deref()).await {
            Ok(bound) => bound,
            Err(e) => {
                error!(%e, "failed to bind external port");
                self.emit(ForwardEvent::ForwardingError {
                    camera_id: camera.id.clone(),
                    message: e.to_string(),
                });
                return Err(e);
            }
        };

        let (session, snapshot) = ForwardingSession::new(
            camera.clone(),
            target_addr,
            listener,
            binding,
            self.config.clone(),
            self.dialer.clone(),
            self.events.clone(),
        );
        self.sessions
            .insert(camera.id.clone(), SessionHandle::spawn(session, snapshot));

        info!(%binding, target = %target_addr, "port forwarding started");
        self.emit(ForwardEvent::ForwardingStarted {
            camera_id: camera.id,
            external_port: port,
        });
        Ok(())
    }

    /// Stop a camera's session and wait for its sockets to close. Does
    /// nothing if the camera is not being forwarded.
    pub async fn stop_forwarding(&mut self, camera_id: &str) {
        let Some(handle) = self.sessions.remove(camera_id) else {
            debug!(camera = camera_id, "stop requested for camera that is not forwarding");
            return;
        };

        info!(camera = camera_id, port = handle.camera().external_port, "stopping port forwarding");
        let summary = handle.stop().await;
        info!(
            camera = camera_id,
            bytes = summary.total_bytes,
            connections = summary.connections_handled,
            "port forwarding stopped"
        );
        self.emit(ForwardEvent::ForwardingStopped {
            camera_id: camera_id.to_string(),
        });
    }

    pub async fn stop_all_forwarding(&mut self) {
        let ids = self.active_forwards();
        if ids.is_empty() {
            return;
        }
        info!(count = ids.len(), "stopping all port forwarding");
        for id in ids {
            self.stop_forwarding(&id).await;
        }
    }

    /// Stop and start a camera's session with the same record.
    pub async fn restart_forwarding(&mut self, camera_id: &str) -> Result<()> {
        let camera = self
            .sessions
            .get(camera_id)
            .map(|h| h.camera().clone())
            .ok_or_else(|| ForwardError::NotFound(camera_id.to_string()))?;

        info!(camera = camera_id, "restarting port forwarding");
        self.stop_forwarding(camera_id).await;
        tokio::time::sleep(self.config.restart_delay).await;
        self.start_forwarding(camera).await
    }

    /// Rebind every session, e.g. after the network layout changed.
    /// Individual failures are logged and do not stop the others.
    pub async fn restart_all_forwarding(&mut self) {
        if self.sessions.is_empty() {
            return;
        }
        let mut cameras: Vec<CameraRecord> =
            self.sessions.values().map(|h| h.camera().clone()).collect();
        cameras.sort_by(|a, b| a.id.cmp(&b.id));

        info!(count = cameras.len(), "restarting all port forwarding");
        self.stop_all_forwarding().await;
        tokio::time::sleep(self.config.restart_all_delay).await;

        for camera in cameras.into_iter().filter(|c| c.enabled) {
            let id = camera.id.clone();
            if let Err(e) = self.start_forwarding(camera).await {
                warn!(camera = %id, %e, "failed to restart port forwarding");
            }
        }
    }

    /// Move a camera's session to `new_port`.
    pub async fn change_external_port(&mut self, camera_id: &str, new_port: u16) -> Result<()> {
        let mut camera = self
            .sessions
            .get(camera_id)
            .map(|h| h.camera().clone())
            .ok_or_else(|| ForwardError::NotFound(camera_id.to_string()))?;

        if let Some(owner) = self.port_owner(new_port, Some(camera_id)) {
            error!(camera = camera_id, port = new_port, owner, "cannot change port, already in use");
            return Err(ForwardError::PortInUse(new_port));
        }

        let old_port = camera.external_port;
        camera.external_port = new_port;
        camera.validate()?;

        info!(camera = camera_id, old_port, new_port, "changing external port");
        self.stop_forwarding(camera_id).await;
        tokio::time::sleep(self.config.restart_delay).await;
        self.start_forwarding(camera).await?;

        self.emit(ForwardEvent::PortChanged {
            camera_id: camera_id.to_string(),
            old_port,
            new_port,
        });
        Ok(())
    }

    /// React to a change reported by the interface monitor.
    pub async fn handle_interface_event(&mut self, event: InterfaceEvent) {
        match event {
            InterfaceEvent::InterfacesChanged => match &self.interfaces {
                Some(provider) => {
                    info!(status = %provider.interface_status(), "network interfaces changed")
                }
                None => info!("network interfaces changed"),
            },
            InterfaceEvent::WireGuardStateChanged(active) => {
                let vpn = self.interfaces.as_ref().and_then(|p| p.wireguard_address());
                info!(active, ?vpn, "WireGuard state changed");
                if active && !self.sessions.is_empty() {
                    info!("WireGuard came up, rebinding port forwards");
                    tokio::time::sleep(self.config.vpn_settle_delay).await;
                    self.restart_all_forwarding().await;
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Port bookkeeping
    // ------------------------------------------------------------------------

    /// Camera id holding `port`, ignoring the camera `except`.
    fn port_owner(&self, port: u16, except: Option<&str>) -> Option<&str> {
        self.sessions
            .iter()
            .find(|(id, h)| h.camera().external_port == port && Some(id.as_str()) != except)
            .map(|(id, _)| id.as_str())
    }

    pub fn is_port_in_use(&self, port: u16) -> bool {
        self.port_owner(port, None).is_some()
    }

    /// First port at or above `start` that no session holds.
    pub fn next_available_port(&self, start: u16) -> Option<u16> {
        (start.max(1)..=u16::MAX).find(|port| !self.is_port_in_use(*port))
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    pub fn is_forwarding(&self, camera_id: &str) -> bool {
        self.sessions.contains_key(camera_id)
    }

    /// Ids of all forwarded cameras, sorted.
    pub fn active_forwards(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn connection_count(&self, camera_id: &str) -> usize {
        self.sessions
            .get(camera_id)
            .map_or(0, SessionHandle::connection_count)
    }

    pub fn bytes_transferred(&self, camera_id: &str) -> u64 {
        self.sessions
            .get(camera_id)
            .map_or(0, SessionHandle::total_bytes)
    }

    pub fn connection_status(&self, camera_id: &str) -> String {
        self.sessions
            .get(camera_id)
            .map_or_else(|| "Not Active".to_string(), SessionHandle::status)
    }

    pub fn binding_info(&self, camera_id: &str) -> String {
        self.sessions.get(camera_id).map_or_else(
            || "Camera session not found".to_string(),
            |h| h.binding().to_string(),
        )
    }

    pub fn session_snapshot(&self, camera_id: &str) -> Option<SessionSnapshot> {
        self.sessions.get(camera_id).map(SessionHandle::snapshot)
    }
}
