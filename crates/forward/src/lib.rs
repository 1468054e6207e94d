//! Per-camera TCP port forwarding for camrelay.
//!
//! This crate provides:
//! - [`ForwardManager`]: one forwarding session per camera, keyed by id, with
//!   external-port exclusivity and restart/port-change operations
//! - Forwarding sessions: a listener plus a table of connection pairs, a
//!   health check that evicts dead connections, and a reconnect guard
//! - Connection pairs: a client socket relayed to the camera in both
//!   directions, with client data buffered while the camera connects
//! - Listener binding with interface fallback, see [`binder`]
//! - Low-latency socket tuning, see [`tuning`]
//!
//! Consumers observe the engine through [`ForwardEvent`]s from
//! [`ForwardManager::subscribe`].

pub mod binder;
pub mod buffer;
pub mod config;
mod connection;
pub mod dial;
pub mod error;
pub mod event;
pub mod manager;
pub mod session;
pub mod sniff;
pub mod tuning;

pub use binder::{Binding, BindingKind};
pub use config::ForwardConfig;
pub use connection::{CloseReason, ConnectionId};
pub use dial::{TargetDialer, TcpDialer};
pub use error::{ForwardError, Result};
pub use event::{Direction, ForwardEvent};
pub use manager::ForwardManager;
pub use session::{ConnectionSnapshot, SessionSnapshot, SessionState, SessionSummary};
