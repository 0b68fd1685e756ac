//! Connection settings and per-attempt connection parameters.

use std::{fmt::Display, time::Duration};

use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);
const DEFAULT_HEARTBEAT_ACK_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_HEARTBEAT_MAX_MISSED: u32 = 3;

const DEFAULT_RETRY_INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const DEFAULT_RETRY_MAX_BACKOFF: Duration = Duration::from_secs(25);
const DEFAULT_RETRY_MULTIPLIER: f64 = 2.0;

/// Parse endpoint settings error
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), module(error), context(suffix(false)))]
pub enum ParseEndpointError {
    /// the str is not a valid url
    #[snafu(display("{s} is an invalid url: {source}"))]
    InvalidUrl {
        /// string be parsed
        s: String,
        /// source error
        source: url::ParseError,
    },

    /// the parsed url schema is not websocket
    #[snafu(display("the url {s} has invalid schema {schema}, only ws or wss is ok"))]
    InvalidSchema {
        /// the url
        s: String,
        /// invalid schema
        schema: String,
    },

    /// the parsed url has no host
    #[snafu(display("the endpoint url {s} has no host"))]
    NoHost {
        /// the url
        s: String,
    },

    /// api key is empty
    #[snafu(display("api key is empty"))]
    EmptyApiKey,
}

/// Keepalive tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct HeartbeatConfig {
    /// delay between two keepalive frames
    pub interval: Duration,
    /// how long to wait for any inbound frame after a keepalive was sent
    pub ack_timeout: Duration,
    /// consecutive missed acknowledgements before the connection is presumed dead
    pub max_missed: u32,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_HEARTBEAT_INTERVAL,
            ack_timeout: DEFAULT_HEARTBEAT_ACK_TIMEOUT,
            max_missed: DEFAULT_HEARTBEAT_MAX_MISSED,
        }
    }
}

/// Retry policy after a temporary (recoverable) transport error.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// retry automatically at all
    pub enabled: bool,
    /// delay before the first retry
    pub initial_backoff: Duration,
    /// upper bound of the delay
    pub max_backoff: Duration,
    /// delay growth factor
    pub multiplier: f64,
    /// give up after this many consecutive failures, `None` retries forever
    pub max_attempts: Option<u32>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_backoff: DEFAULT_RETRY_INITIAL_BACKOFF,
            max_backoff: DEFAULT_RETRY_MAX_BACKOFF,
            multiplier: DEFAULT_RETRY_MULTIPLIER,
            max_attempts: None,
        }
    }
}

impl From<&RetryConfig> for ExponentialBackoff {
    fn from(config: &RetryConfig) -> Self {
        ExponentialBackoffBuilder::default()
            .with_initial_interval(config.initial_backoff)
            .with_max_interval(config.max_backoff)
            .with_multiplier(config.multiplier)
            .with_max_elapsed_time(None)
            .build()
    }
}

/// Manager wide settings, fixed for its lifetime.
#[derive(Debug, Clone)]
pub struct Settings {
    /// websocket endpoint, ws or wss
    pub endpoint: url::Url,
    /// application api key
    pub api_key: String,
    /// keepalive tuning
    pub heartbeat: HeartbeatConfig,
    /// temporary error retry policy
    pub retry: RetryConfig,
}

impl Settings {
    /// Validate endpoint and api key, all tuning gets default value.
    pub fn new<S, K>(endpoint: &S, api_key: K) -> Result<Self, ParseEndpointError>
    where
        S: AsRef<str> + ?Sized,
        K: Into<String>,
    {
        let s = endpoint.as_ref();
        let endpoint = url::Url::parse(s).with_context(|_| error::InvalidUrl { s })?;

        ensure!(
            endpoint.scheme() == "wss" || endpoint.scheme() == "ws",
            error::InvalidSchema {
                s,
                schema: endpoint.scheme(),
            }
        );

        ensure!(endpoint.host().is_some(), error::NoHost { s });

        let api_key = api_key.into();
        ensure!(!api_key.is_empty(), error::EmptyApiKey);

        Ok(Self {
            endpoint,
            api_key,
            heartbeat: HeartbeatConfig::default(),
            retry: RetryConfig::default(),
        })
    }

    /// Build connection parameters for one user.
    pub fn connection(&self, user: User, anonymous: bool) -> ConnectionConfig {
        ConnectionConfig {
            endpoint: self.endpoint.clone(),
            api_key: self.api_key.clone(),
            user,
            anonymous,
            reconnect: false,
        }
    }
}

/// Identity the connection is opened for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// user id
    pub id: String,
    /// display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// avatar url
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl User {
    /// User with only an id.
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }
}

/// Parameters of one connection attempt. Replaced, never mutated, on reconnect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// websocket endpoint
    pub endpoint: url::Url,
    /// application api key
    pub api_key: String,
    /// connecting user
    pub user: User,
    /// anonymous connection, no token is sent
    pub anonymous: bool,
    /// this attempt resumes an earlier connection
    pub reconnect: bool,
}

impl ConnectionConfig {
    /// Same parameters marked as a resumed attempt.
    pub fn as_reconnect(&self) -> Self {
        Self {
            reconnect: true,
            ..self.clone()
        }
    }

    /// Construct final connect url.
    ///
    /// `token` is only sent for authenticated connections.
    pub fn url(&self, token: Option<&str>) -> url::Url {
        let payload = serde_json::json!({
            "user_id": self.user.id,
            "user_details": self.user,
            "server_determines_connection_id": true,
        });

        let mut u = self.endpoint.clone();
        {
            let mut query = u.query_pairs_mut();
            query.append_pair("json", &payload.to_string());
            query.append_pair("api_key", &self.api_key);
            match (self.anonymous, token) {
                (false, Some(token)) => {
                    query.append_pair("authorization", token);
                    query.append_pair("stream-auth-type", "jwt");
                }
                _ => {
                    query.append_pair("stream-auth-type", "anonymous");
                }
            }
        }

        u
    }
}

impl Display for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}(user={}, {}{})",
            self.endpoint,
            self.user.id,
            if self.anonymous { "anonymous" } else { "authenticated" },
            if self.reconnect { ", reconnect" } else { "" },
        )
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_settings_reject_http_schema() {
        let err = Settings::new("https://example.com/connect", "key").unwrap_err();
        assert!(matches!(err, ParseEndpointError::InvalidSchema { .. }));
    }

    #[test]
    fn test_settings_reject_garbage() {
        let err = Settings::new("not a url", "key").unwrap_err();
        assert!(matches!(err, ParseEndpointError::InvalidUrl { .. }));
    }

    #[test]
    fn test_settings_reject_empty_key() {
        let err = Settings::new("wss://example.com/connect", "").unwrap_err();
        assert!(matches!(err, ParseEndpointError::EmptyApiKey));
    }

    #[test]
    fn test_settings_defaults() {
        let settings = Settings::new("wss://example.com/connect", "key").unwrap();
        assert_eq!(settings.heartbeat.interval, Duration::from_secs(10));
        assert_eq!(settings.heartbeat.max_missed, 3);
        assert!(settings.retry.enabled);
    }

    #[test]
    fn test_authenticated_url() {
        let settings = Settings::new("wss://example.com/connect", "key").unwrap();
        let config = settings.connection(User::new("alice"), false);

        let url = config.url(Some("jwt-token"));
        let query = url.query_pairs().collect::<HashMap<_, _>>();

        assert_eq!(url.path(), "/connect");
        assert_eq!(query["api_key"], "key");
        assert_eq!(query["authorization"], "jwt-token");
        assert_eq!(query["stream-auth-type"], "jwt");

        let json: serde_json::Value = serde_json::from_str(&query["json"]).unwrap();
        assert_eq!(json["user_id"], "alice");
        assert_eq!(json["user_details"]["id"], "alice");
        assert_eq!(json["server_determines_connection_id"], true);
    }

    #[test]
    fn test_anonymous_url_has_no_token() {
        let settings = Settings::new("ws://127.0.0.1:7777/connect", "key").unwrap();
        let config = settings.connection(User::new("guest"), true);

        let url = config.url(Some("ignored"));
        let query = url.query_pairs().collect::<HashMap<_, _>>();

        assert!(!query.contains_key("authorization"));
        assert_eq!(query["stream-auth-type"], "anonymous");
    }

    #[test]
    fn test_reconnect_marker() {
        let settings = Settings::new("wss://example.com/connect", "key").unwrap();
        let config = settings.connection(User::new("alice"), false);
        let again = config.as_reconnect();

        assert!(!config.reconnect);
        assert!(again.reconnect);
        assert_eq!(again.user, config.user);
        assert_ne!(again, config);
    }
}
