//! Default transport over websocket.

mod stream;

pub use stream::FrameStream;

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{Sink, SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_tungstenite::{self as websocket, tungstenite};

use crate::{
    config::ConnectionConfig,
    message::{decode_error_body, Message},
    observer::CredentialManager,
    transport::{code, SocketError, Transport, TransportFactory, TransportSession},
};

/// Opens one websocket per connection attempt.
pub struct WebSocketFactory {
    credentials: Arc<dyn CredentialManager>,
}

impl std::fmt::Debug for WebSocketFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketFactory").finish_non_exhaustive()
    }
}

impl WebSocketFactory {
    /// Tokens for authenticated connections come from `credentials`.
    pub fn new(credentials: Arc<dyn CredentialManager>) -> Self {
        Self { credentials }
    }
}

fn connect_error(err: tungstenite::Error) -> SocketError {
    match err {
        tungstenite::Error::Http(response) => {
            let status = response.status().as_u16();
            response
                .body()
                .as_ref()
                .and_then(|body| decode_error_body(AsRef::<[u8]>::as_ref(body)))
                .unwrap_or_else(|| {
                    SocketError::new(
                        code::SOCKET_FAILURE,
                        format!("websocket handshake rejected with http {}", status),
                    )
                })
                .with_status(status)
        }
        err => SocketError::new(code::SOCKET_FAILURE, err.to_string()),
    }
}

#[async_trait]
impl TransportFactory for WebSocketFactory {
    async fn open(&self, config: &ConnectionConfig) -> Result<TransportSession, SocketError> {
        let token = if config.anonymous {
            None
        } else {
            let token = self.credentials.token().await.ok_or_else(|| {
                SocketError::new(
                    code::UNDEFINED_TOKEN,
                    "no token for an authenticated connection",
                )
            })?;
            Some(token)
        };

        let u = config.url(token.as_deref());

        log::debug!("Connecting websocket: {}", config);

        let (ws, _) = websocket::connect_async(u.as_str())
            .await
            .map_err(connect_error)?;

        log::debug!("Websocket connected");

        let (sink, stream) = ws.split();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(write_loop(sink, rx));

        Ok(TransportSession {
            transport: Arc::new(WebSocketTransport {
                outgoing: Mutex::new(Some(tx)),
            }),
            frames: FrameStream::new(stream).boxed(),
        })
    }
}

/// Outbound half of a websocket, closing drops the writer queue.
#[derive(Debug)]
struct WebSocketTransport {
    outgoing: Mutex<Option<mpsc::UnboundedSender<Message>>>,
}

impl Transport for WebSocketTransport {
    fn send(&self, message: &Message) -> bool {
        match *self.outgoing.lock() {
            Some(ref tx) => tx.send(message.clone()).is_ok(),
            None => false,
        }
    }

    fn close(&self) {
        if self.outgoing.lock().take().is_some() {
            log::debug!("Websocket transport closing");
        }
    }
}

async fn write_loop<S>(mut sink: S, mut rx: mpsc::UnboundedReceiver<Message>)
where
    S: Sink<tungstenite::Message, Error = tungstenite::Error> + Unpin,
{
    while let Some(message) = rx.recv().await {
        log::trace!("Send {} frame", message.type_name());
        if let Err(err) = sink
            .send(tungstenite::Message::Text(message.encode().into()))
            .await
        {
            log::debug!("Websocket sink broken when send message: {}", err);
            return;
        }
    }

    log::trace!("Writer queue closed, close websocket");
    if let Err(err) = sink.close().await {
        log::debug!("Close websocket failed: {}", err);
    }
}
