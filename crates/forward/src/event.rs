use std::fmt;

/// Direction of a relayed byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    ClientToTarget,
    TargetToClient,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClientToTarget => "client->target",
            Self::TargetToClient => "target->client",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notifications published by the engine for UI and metadata consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardEvent {
    ForwardingStarted {
        camera_id: String,
        external_port: u16,
    },
    ForwardingStopped {
        camera_id: String,
    },
    ForwardingError {
        camera_id: String,
        message: String,
    },
    ConnectionEstablished {
        camera_id: String,
        client_address: String,
    },
    ConnectionClosed {
        camera_id: String,
        client_address: String,
    },
    DataTransferred {
        camera_id: String,
        bytes: u64,
        direction: Direction,
    },
    ReconnectionAttempt {
        camera_id: String,
        attempt: u32,
    },
    PortChanged {
        camera_id: String,
        old_port: u16,
        new_port: u16,
    },
}

impl ForwardEvent {
    pub fn camera_id(&self) -> &str {
        match self {
            Self::ForwardingStarted { camera_id, .. }
            | Self::ForwardingStopped { camera_id }
            | Self::ForwardingError { camera_id, .. }
            | Self::ConnectionEstablished { camera_id, .. }
            | Self::ConnectionClosed { camera_id, .. }
            | Self::DataTransferred { camera_id, .. }
            | Self::ReconnectionAttempt { camera_id, .. }
            | Self::PortChanged { camera_id, .. } => camera_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_labels() {
        assert_eq!(Direction::ClientToTarget.to_string(), "client->target");
        assert_eq!(Direction::TargetToClient.to_string(), "target->client");
    }

    #[test]
    fn camera_id_accessor() {
        let ev = ForwardEvent::PortChanged {
            camera_id: "cam-a".into(),
            old_port: 8551,
            new_port: 8552,
        };
        assert_eq!(ev.camera_id(), "cam-a");
    }
}
