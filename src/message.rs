//! Realtime wire frames.

use bytes::Bytes;
use enum_as_inner::EnumAsInner;
use serde::Deserialize;
use snafu::prelude::*;

use crate::{
    state::HandshakeInfo,
    transport::{code, SocketError},
};

static HEALTH_CHECK_TYPE: &str = "health.check";

/// Error when parse frame data as message
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), module(error), context(suffix(false)))]
pub enum ParseMessageError {
    /// data is invalid json
    #[snafu(display("parse json failed: {source}"))]
    ParseJsonFailed {
        /// data for decode
        data: Bytes,
        /// source error
        source: serde_json::Error,
    },

    /// data json is not an object
    #[snafu(display("parsed frame is not object: {json}"))]
    MessageNotObject {
        /// json string
        json: String,
    },

    /// data json has neither type nor error field
    #[snafu(display("frame has no type field: {json}"))]
    NoEventType {
        /// json string
        json: String,
    },

    /// error field can not be read
    #[snafu(display("invalid error body: {source}"))]
    InvalidErrorBody {
        /// source error
        source: serde_json::Error,
    },

    /// health check frame misses required fields
    #[snafu(display("invalid health check frame: {source}"))]
    InvalidHealthCheck {
        /// source error
        source: serde_json::Error,
    },
}

impl ParseMessageError {
    /// Convert to the socket error reported to the connection manager.
    pub fn to_socket_error(&self) -> SocketError {
        let c = match self {
            Self::InvalidHealthCheck { .. } => code::CANT_PARSE_CONNECTION_EVENT,
            _ => code::CANT_PARSE_EVENT,
        };
        SocketError::new(c, self.to_string())
    }
}

/// An application event the core does not interpret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    /// value of the type field
    pub kind: String,
    /// the whole frame
    pub body: serde_json::Value,
}

/// Parsed realtime message.
#[derive(Debug, Clone, PartialEq, Eq, EnumAsInner)]
pub enum Message {
    /// connection established, server -> client
    Connected(HandshakeInfo),
    /// keepalive for a connection id, both directions
    HealthCheck(Option<String>),
    /// any other event, server -> client or client -> server
    Event(RawEvent),
}

/// One inbound item of a transport session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// a parsed message
    Message(Message),
    /// transport failure or server error frame
    Error(SocketError),
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: i32,
    #[serde(default)]
    message: String,
    #[serde(rename = "StatusCode")]
    status_code: Option<u16>,
}

#[derive(Debug, Deserialize)]
struct HealthCheck {
    connection_id: String,
    #[serde(default)]
    me: Option<serde_json::Value>,
    #[serde(default)]
    created_at: Option<String>,
}

impl Frame {
    /// Decode data to a frame
    pub fn decode(buff: Bytes) -> Result<Self, ParseMessageError> {
        let value: serde_json::Value =
            serde_json::from_slice(&buff).context(error::ParseJsonFailed { data: buff.clone() })?;

        let obj = value.as_object().with_context(|| error::MessageNotObject {
            json: String::from_utf8_lossy(&buff),
        })?;

        if let Some(body) = obj.get("error") {
            let body: ErrorBody =
                serde_json::from_value(body.clone()).context(error::InvalidErrorBody)?;
            let mut err = SocketError::new(body.code, body.message);
            err.status_code = body.status_code;
            return Ok(Self::Error(err));
        }

        let kind = obj
            .get("type")
            .and_then(|t| t.as_str())
            .with_context(|| error::NoEventType {
                json: String::from_utf8_lossy(&buff),
            })?;

        if kind != HEALTH_CHECK_TYPE {
            return Ok(Self::Message(Message::Event(RawEvent {
                kind: kind.to_string(),
                body: value.clone(),
            })));
        }

        let health: HealthCheck =
            serde_json::from_value(value.clone()).context(error::InvalidHealthCheck)?;

        // only the first health check of a session carries the user
        let message = match health.me {
            Some(me) => Message::Connected(HandshakeInfo {
                connection_id: health.connection_id,
                me: serde_json::from_value(me).context(error::InvalidHealthCheck)?,
                created_at: health.created_at,
            }),
            None => Message::HealthCheck(Some(health.connection_id)),
        };

        Ok(Self::Message(message))
    }
}

/// Read an error body returned outside a frame, e.g. with a rejected websocket handshake.
///
/// Both the wrapped `{"error": {..}}` and the flat form are accepted.
pub(crate) fn decode_error_body(data: &[u8]) -> Option<SocketError> {
    let value: serde_json::Value = serde_json::from_slice(data).ok()?;
    let body = value.get("error").cloned().unwrap_or(value);
    let body: ErrorBody = serde_json::from_value(body).ok()?;

    let mut err = SocketError::new(body.code, body.message);
    err.status_code = body.status_code;
    Some(err)
}

impl Message {
    /// Keepalive for the given connection.
    pub fn health_check(connection_id: &str) -> Self {
        Self::HealthCheck(Some(connection_id.to_string()))
    }

    /// encode to a json text frame
    pub fn encode(&self) -> String {
        let value = match self {
            Self::Connected(info) => serde_json::json!({
                "type": HEALTH_CHECK_TYPE,
                "connection_id": info.connection_id,
            }),
            Self::HealthCheck(connection_id) => serde_json::json!({
                "type": HEALTH_CHECK_TYPE,
                "connection_id": connection_id,
            }),
            Self::Event(event) => event.body.clone(),
        };
        value.to_string()
    }

    /// get type name
    pub fn type_name(&self) -> &str {
        match self {
            Self::Connected(_) | Self::HealthCheck(_) => HEALTH_CHECK_TYPE,
            Self::Event(event) => &event.kind,
        }
    }
}

#[cfg(test)]
mod test {
    mod decode {
        use super::super::*;
        use serde_json::json;

        fn bytes(value: serde_json::Value) -> Bytes {
            serde_json::to_vec(&value).unwrap().into()
        }

        #[test]
        fn test_frame_decode_connected() {
            let data = bytes(json!({
                "type": "health.check",
                "connection_id": "some-connection-id",
                "cid": "*",
                "me": { "id": "alice", "name": "Alice", "role": "user" },
                "created_at": "2022-01-01T00:00:00Z",
            }));

            let frame = Frame::decode(data).unwrap();

            if let Frame::Message(Message::Connected(info)) = frame {
                assert_eq!(info.connection_id, "some-connection-id");
                assert_eq!(info.me.unwrap().name.as_deref(), Some("Alice"));
                assert_eq!(info.created_at.as_deref(), Some("2022-01-01T00:00:00Z"));
            } else {
                panic!("decoded frame is not connected")
            }
        }

        #[test]
        fn test_frame_decode_health_check() {
            let data = bytes(json!({
                "type": "health.check",
                "connection_id": "some-connection-id",
            }));

            let frame = Frame::decode(data).unwrap();

            assert_eq!(
                frame,
                Frame::Message(Message::health_check("some-connection-id"))
            );
        }

        #[test]
        fn test_frame_decode_event() {
            let data = bytes(json!({
                "type": "message.new",
                "cid": "messaging:general",
                "message": { "text": "hi" },
            }));

            let frame = Frame::decode(data).unwrap();

            let event = match frame {
                Frame::Message(message) => message.into_event().unwrap(),
                _ => panic!("decoded frame is not an event"),
            };
            assert_eq!(event.kind, "message.new");
            assert_eq!(event.body["message"]["text"], "hi");
        }

        #[test]
        fn test_frame_decode_error() {
            let data = bytes(json!({
                "error": {
                    "code": 40,
                    "message": "token expired",
                    "StatusCode": 401,
                    "duration": "",
                }
            }));

            let frame = Frame::decode(data).unwrap();

            assert_eq!(
                frame,
                Frame::Error(
                    SocketError::new(code::TOKEN_EXPIRED, "token expired").with_status(401)
                )
            );
        }

        #[test]
        fn test_frame_decode_health_check_without_id() {
            let err = Frame::decode(bytes(json!({ "type": "health.check" }))).unwrap_err();

            assert!(matches!(err, ParseMessageError::InvalidHealthCheck { .. }));
            assert_eq!(err.to_socket_error().code, code::CANT_PARSE_CONNECTION_EVENT);
        }

        #[test]
        fn test_frame_decode_untyped() {
            let err = Frame::decode(bytes(json!({ "cid": "x" }))).unwrap_err();

            assert!(matches!(err, ParseMessageError::NoEventType { .. }));
            assert_eq!(err.to_socket_error().code, code::CANT_PARSE_EVENT);
        }

        #[test]
        fn test_decode_flat_error_body() {
            let data = br#"{"code":2,"message":"api key not found","StatusCode":401}"#;

            let err = decode_error_body(data).unwrap();

            assert_eq!(err.code, code::API_KEY_NOT_FOUND);
            assert_eq!(err.status_code, Some(401));
            assert!(decode_error_body(b"<html>bad gateway</html>").is_none());
        }

        #[test]
        fn test_frame_decode_not_json() {
            let err = Frame::decode(Bytes::from_static(b"PONG")).unwrap_err();
            assert!(matches!(err, ParseMessageError::ParseJsonFailed { .. }));
        }
    }

    mod encode {
        use super::super::*;

        #[test]
        fn test_message_encode_health_check() {
            let text = Message::health_check("conn-1").encode();
            let value: serde_json::Value = serde_json::from_str(&text).unwrap();

            assert_eq!(value["type"], "health.check");
            assert_eq!(value["connection_id"], "conn-1");
        }
    }
}
