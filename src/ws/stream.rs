use std::task::Poll;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tokio_tungstenite::tungstenite as websocket;

use crate::{
    message::Frame,
    transport::{code, SocketError},
};

/// Inbound frames of a websocket.
///
/// Unparsable data becomes an error frame. The stream yields one terminal
/// error frame when the socket closes or fails, then ends.
#[derive(Debug)]
pub struct FrameStream<S> {
    ws: S,
    done: bool,
}

impl<S> FrameStream<S> {
    /// Wrap the read half of a websocket.
    pub fn new(ws: S) -> Self {
        Self { ws, done: false }
    }
}

impl<S> Stream for FrameStream<S>
where
    S: Stream<Item = Result<websocket::Message, websocket::Error>> + Unpin,
{
    type Item = Frame;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> Poll<Option<Self::Item>> {
        loop {
            if self.done {
                return Poll::Ready(None);
            }

            let frame = match self.ws.poll_next_unpin(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(None) => {
                    self.done = true;
                    return Poll::Ready(Some(Frame::Error(SocketError::closed())));
                }
                Poll::Ready(Some(Err(err))) => {
                    self.done = true;
                    return Poll::Ready(Some(Frame::Error(SocketError::new(
                        code::SOCKET_FAILURE,
                        err.to_string(),
                    ))));
                }
                Poll::Ready(Some(Ok(frame))) => frame,
            };

            let data: Bytes = match frame {
                websocket::Message::Text(text) => Bytes::from(text),
                websocket::Message::Binary(data) => Bytes::from(data),
                websocket::Message::Close(reason) => {
                    self.done = true;
                    let err = match reason {
                        Some(reason) => SocketError::new(code::SOCKET_CLOSED, reason.to_string()),
                        None => SocketError::closed(),
                    };
                    return Poll::Ready(Some(Frame::Error(err)));
                }
                _ => continue,
            };

            let result = match Frame::decode(data.clone()) {
                Ok(frame) => frame,
                Err(e) => {
                    log::trace!(
                        "Parse failed frame data: {}",
                        std::str::from_utf8(&data).unwrap_or("<not-utf8-binary>")
                    );
                    Frame::Error(e.to_socket_error())
                }
            };

            return Poll::Ready(Some(result));
        }
    }
}
