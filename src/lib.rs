//! # Sockstate
//!
//! Lifecycle manager of a single realtime connection.
//!
//! A pure [`state::transition`] table decides the next connection state, a reactor
//! task owned by [`ConnectionManager`] runs the effects of every state it enters:
//! opening and closing the transport, keepalive via [`health::HealthMonitor`],
//! observer (un)subscription and listener notification.

#![deny(clippy::all)]
#![warn(missing_debug_implementations, missing_docs)]
#![forbid(unsafe_code)]

pub mod config;
pub mod health;
pub mod listener;
pub mod message;
pub mod observer;
pub mod state;
pub mod transport;
pub mod ws;

mod error;
mod manager;

pub use config::{ConnectionConfig, HeartbeatConfig, RetryConfig, Settings, User};
pub use error::Error;
pub use listener::ConnectionListener;
pub use manager::{ConnectionManager, ConnectionManagerBuilder, DEFAULT_CONNECTION_TIMEOUT};
pub use message::{Message, RawEvent};
pub use state::{ConnectionKind, DisconnectCause, Disconnected, Event, HandshakeInfo, State};
pub use transport::{Frame, SocketError};

/// crate result type
pub type Result<T> = std::result::Result<T, Error>;
