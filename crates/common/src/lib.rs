//! Shared building blocks for camrelay.
//!
//! - [`camera::CameraRecord`]: the camera description the relay engine consumes
//! - [`interfaces`]: the network-interface collaborator used for listener binding
//! - [`monitor`]: polling loop that reports interface and VPN state changes

pub mod camera;
mod error;
pub mod interfaces;
pub mod monitor;

pub use camera::CameraRecord;
pub use error::Error;
pub use interfaces::{InterfaceProvider, SystemInterfaces};
pub use monitor::{run_interface_monitor, InterfaceEvent};

pub type Result<T> = std::result::Result<T, Error>;
