//! Connection states and the events that move between them.

pub mod machine;

use std::fmt::Display;

use enum_as_inner::EnumAsInner;
use serde::{Deserialize, Serialize};

pub use machine::{transition, StateMachine, UnhandledHook};

use crate::{
    config::{ConnectionConfig, User},
    transport::SocketError,
};

/// Classification of a connect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionKind {
    /// first connection requested by the user
    Initial,
    /// triggered internally, never overrides a user disconnect or a permanent failure
    AutomaticReconnect,
    /// explicitly requested despite a terminal state
    ForcedReconnect,
}

/// Data the server returns once the connection is established.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeInfo {
    /// server assigned connection id
    pub connection_id: String,
    /// the connected user as the server sees it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub me: Option<User>,
    /// server side creation time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

/// Disconnected sub states.
#[derive(Debug, Clone, PartialEq, Eq, EnumAsInner)]
pub enum Disconnected {
    /// app went background
    Stopped,
    /// no network connectivity
    NetworkDisconnected,
    /// connection presumed dead by the health monitor
    WebSocketEventLost,
    /// user called disconnect
    ByRequest,
    /// recoverable transport error
    Temporarily(SocketError),
    /// unrecoverable error, needs new credentials or a forced reconnect
    Permanently(SocketError),
}

impl Disconnected {
    /// Reason reported to listeners when entering this state.
    pub fn cause(&self) -> DisconnectCause {
        match self {
            Self::ByRequest | Self::Stopped => DisconnectCause::ConnectionReleased,
            Self::NetworkDisconnected => DisconnectCause::NetworkNotAvailable,
            Self::Permanently(err) => DisconnectCause::UnrecoverableError(err.clone()),
            Self::Temporarily(err) => DisconnectCause::Error(err.clone()),
            Self::WebSocketEventLost => DisconnectCause::WebSocketNotAvailable,
        }
    }
}

/// Connection state, owned by the [`StateMachine`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum State {
    /// was suspended and must resume
    RestartConnection,
    /// a transport is being opened
    Connecting(ConnectionConfig, ConnectionKind),
    /// handshake received
    Connected(HandshakeInfo),
    /// not connected
    Disconnected(Disconnected),
}

impl State {
    /// true iff connected
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected(_))
    }

    /// handshake data, only when connected
    pub fn handshake(&self) -> Option<&HandshakeInfo> {
        match self {
            Self::Connected(info) => Some(info),
            _ => None,
        }
    }
}

impl Default for State {
    fn default() -> Self {
        Self::Disconnected(Disconnected::Stopped)
    }
}

impl Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RestartConnection => f.write_str("RestartConnection"),
            Self::Connecting(_, kind) => write!(f, "Connecting({:?})", kind),
            Self::Connected(info) => write!(f, "Connected({})", info.connection_id),
            Self::Disconnected(Disconnected::Stopped) => f.write_str("Disconnected.Stopped"),
            Self::Disconnected(Disconnected::NetworkDisconnected) => {
                f.write_str("Disconnected.Network")
            }
            Self::Disconnected(Disconnected::WebSocketEventLost) => {
                f.write_str("Disconnected.InactiveWS")
            }
            Self::Disconnected(Disconnected::ByRequest) => f.write_str("Disconnected.ByRequest"),
            Self::Disconnected(Disconnected::Temporarily(err)) => {
                write!(f, "Disconnected.Temporarily({})", err.code)
            }
            Self::Disconnected(Disconnected::Permanently(err)) => {
                write!(f, "Disconnected.Permanently({})", err.code)
            }
        }
    }
}

/// Inputs of the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// open a connection
    Connect(ConnectionConfig, ConnectionKind),
    /// handshake frame received
    ConnectionEstablished(HandshakeInfo),
    /// network came back
    NetworkAvailable,
    /// network went away
    NetworkNotAvailable,
    /// health monitor gave up on the connection
    WebSocketEventLost,
    /// recoverable transport error
    NetworkError(SocketError),
    /// unrecoverable transport error
    UnrecoverableError(SocketError),
    /// user asked to disconnect
    RequiredDisconnection,
    /// app went background
    Stop,
    /// app came foreground
    Resume,
}

impl Event {
    /// short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connect(..) => "Connect",
            Self::ConnectionEstablished(_) => "ConnectionEstablished",
            Self::NetworkAvailable => "NetworkAvailable",
            Self::NetworkNotAvailable => "NetworkNotAvailable",
            Self::WebSocketEventLost => "WebSocketEventLost",
            Self::NetworkError(_) => "NetworkError",
            Self::UnrecoverableError(_) => "UnrecoverableError",
            Self::RequiredDisconnection => "RequiredDisconnection",
            Self::Stop => "Stop",
            Self::Resume => "Resume",
        }
    }
}

/// Why a connection went down, as reported to listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectCause {
    /// released on purpose (user request or app background)
    ConnectionReleased,
    /// no network connectivity
    NetworkNotAvailable,
    /// permanent failure
    UnrecoverableError(SocketError),
    /// temporary failure
    Error(SocketError),
    /// health monitor presumed the connection dead
    WebSocketNotAvailable,
}
