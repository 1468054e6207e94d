use thiserror::Error;

/// Errors returned by the forwarding engine's public operations.
///
/// Transient network conditions on live connections are never returned as
/// errors; they are logged and, where a user needs to know, published as
/// `ForwardEvent::ForwardingError`.
#[derive(Error, Debug)]
pub enum ForwardError {
    #[error("invalid or disabled camera: {0}")]
    InvalidCamera(String),

    #[error("External port {0} is already in use by another camera")]
    PortInUse(u16),

    #[error("Failed to bind port {port}: {message}")]
    Bind { port: u16, message: String },

    #[error("no forwarding session for camera {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<common::Error> for ForwardError {
    fn from(e: common::Error) -> Self {
        ForwardError::InvalidCamera(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ForwardError>;
