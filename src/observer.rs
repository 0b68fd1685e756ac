//! Collaborators that push signals into the connection core.

use std::sync::Arc;

use async_trait::async_trait;

/// Receives connectivity changes.
#[async_trait]
pub trait NetworkStateListener: Send + Sync {
    /// network became available
    async fn on_connected(&self);
    /// network went away
    async fn on_disconnected(&self);
}

/// Source of connectivity information.
pub trait NetworkStateProvider: Send + Sync {
    /// current connectivity
    fn is_connected(&self) -> bool;
    /// start pushing changes to the listener
    fn subscribe(&self, listener: Arc<dyn NetworkStateListener>);
    /// stop pushing changes to the listener
    fn unsubscribe(&self, listener: &Arc<dyn NetworkStateListener>);
}

/// Receives app foreground/background changes.
#[async_trait]
pub trait LifecycleHandler: Send + Sync {
    /// app came to foreground
    async fn resume(&self);
    /// app went to background
    async fn stopped(&self);
}

/// Source of app lifecycle information.
pub trait LifecycleObserver: Send + Sync {
    /// start pushing changes to the handler
    fn observe(&self, handler: Arc<dyn LifecycleHandler>);
    /// stop pushing changes to the handler
    fn dispose(&self, handler: &Arc<dyn LifecycleHandler>);
}

/// Owner of the user token.
#[async_trait]
pub trait CredentialManager: Send + Sync {
    /// Token for an authenticated connection, `None` if there is none yet.
    async fn token(&self) -> Option<String>;

    /// Drop the stored token, the next connect attempt must fetch a new one.
    async fn expire_token(&self);
}

/// A network that never goes away.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysOnline;

impl NetworkStateProvider for AlwaysOnline {
    fn is_connected(&self) -> bool {
        true
    }

    fn subscribe(&self, _listener: Arc<dyn NetworkStateListener>) {}

    fn unsubscribe(&self, _listener: &Arc<dyn NetworkStateListener>) {}
}

/// An app that stays in foreground.
#[derive(Debug, Default, Clone, Copy)]
pub struct Foreground;

impl LifecycleObserver for Foreground {
    fn observe(&self, _handler: Arc<dyn LifecycleHandler>) {}

    fn dispose(&self, _handler: &Arc<dyn LifecycleHandler>) {}
}

/// A fixed token. Expiring it only logs, there is nothing to refresh.
#[derive(Debug, Default, Clone)]
pub struct StaticToken(Option<String>);

impl StaticToken {
    /// Use the token for every authenticated connection.
    pub fn new<S: Into<String>>(token: S) -> Self {
        Self(Some(token.into()))
    }

    /// No token, only anonymous connections can succeed.
    pub fn none() -> Self {
        Self(None)
    }
}

#[async_trait]
impl CredentialManager for StaticToken {
    async fn token(&self) -> Option<String> {
        self.0.clone()
    }

    async fn expire_token(&self) {
        log::warn!("Static token was rejected by the server, it can not be refreshed");
    }
}
