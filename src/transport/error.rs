use std::fmt;

/// Error codes reported by the server or produced locally by a transport.
pub mod code {
    /// api key of the connection is unknown to the server
    pub const API_KEY_NOT_FOUND: i32 = 2;
    /// the connect request failed validation
    pub const VALIDATION_ERROR: i32 = 4;
    /// token has expired
    pub const TOKEN_EXPIRED: i32 = 40;
    /// token is not valid
    pub const TOKEN_NOT_VALID: i32 = 41;
    /// token issue date is in the future
    pub const TOKEN_DATE_INCORRECT: i32 = 42;
    /// token signature does not match
    pub const TOKEN_SIGNATURE_INCORRECT: i32 = 43;

    /// network request failed
    pub const NETWORK_FAILED: i32 = 1000;
    /// response can not be parsed
    pub const PARSER_ERROR: i32 = 1001;
    /// socket was closed by the peer
    pub const SOCKET_CLOSED: i32 = 1002;
    /// socket failed (io, handshake, tls)
    pub const SOCKET_FAILURE: i32 = 1003;
    /// the connection-established frame can not be parsed
    pub const CANT_PARSE_CONNECTION_EVENT: i32 = 1004;
    /// an event frame can not be parsed
    pub const CANT_PARSE_EVENT: i32 = 1005;
    /// local token is malformed
    pub const INVALID_TOKEN: i32 = 1006;
    /// no token available for an authenticated connection
    pub const UNDEFINED_TOKEN: i32 = 1007;
}

/// A transport level failure, carried by value inside states and disconnect causes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketError {
    /// error code, see [`code`]
    pub code: i32,
    /// human readable reason
    pub message: String,
    /// http status code the server answered with, if any
    pub status_code: Option<u16>,
}

impl SocketError {
    /// Create an error without http status.
    pub fn new<S: Into<String>>(code: i32, message: S) -> Self {
        Self {
            code,
            message: message.into(),
            status_code: None,
        }
    }

    /// Attach http status code.
    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    /// The peer closed the socket.
    pub fn closed() -> Self {
        Self::new(code::SOCKET_CLOSED, "socket closed by peer")
    }

    /// Token related failure, the stored credential should be dropped.
    pub fn is_authentication_error(&self) -> bool {
        matches!(
            self.code,
            code::TOKEN_EXPIRED..=code::TOKEN_SIGNATURE_INCORRECT
        )
    }

    /// Retrying with the same credentials can never succeed.
    pub fn is_unrecoverable(&self) -> bool {
        self.is_authentication_error()
            || matches!(
                self.code,
                code::UNDEFINED_TOKEN
                    | code::INVALID_TOKEN
                    | code::API_KEY_NOT_FOUND
                    | code::VALIDATION_ERROR
            )
    }

    /// Check if this error should tear the connection down.
    pub fn is_fatal(&self) -> bool {
        self.code != code::CANT_PARSE_EVENT
    }
}

impl fmt::Display for SocketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status_code {
            Some(status) => write!(
                f,
                "socket error {} (http {}): {}",
                self.code, status, self.message
            ),
            None => write!(f, "socket error {}: {}", self.code, self.message),
        }
    }
}

impl std::error::Error for SocketError {}
