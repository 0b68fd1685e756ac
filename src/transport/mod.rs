//! The seam between the connection core and the wire.
//!
//! A [`TransportFactory`] opens one [`TransportSession`] per connection attempt.
//! The session owns an outbound [`Transport`] handle and the inbound [`Frame`]
//! stream. The stream ends after the transport reports a terminal error.

mod error;

use std::{fmt::Debug, sync::Arc};

use async_trait::async_trait;
use futures_util::stream::BoxStream;

pub use crate::message::Frame;
pub use error::{code, SocketError};

use crate::{config::ConnectionConfig, message::Message};

/// Outbound half of an open connection.
pub trait Transport: Send + Sync {
    /// Queue one message for delivery, false when the transport is already closed.
    fn send(&self, message: &Message) -> bool;

    /// Close the connection. Calling it more than once is harmless.
    fn close(&self);
}

/// Opens transports.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Open a connection for the config.
    ///
    /// A failure here is reported the same way as a terminal error on the frame stream.
    async fn open(&self, config: &ConnectionConfig) -> Result<TransportSession, SocketError>;
}

/// An open transport and its inbound frames.
pub struct TransportSession {
    /// outbound handle
    pub transport: Arc<dyn Transport>,
    /// inbound frames
    pub frames: BoxStream<'static, Frame>,
}

impl Debug for TransportSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportSession").finish_non_exhaustive()
    }
}
