//! Listener registry and ordered notification fan-out.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::{sync::mpsc, task::JoinHandle};

use crate::{
    message::RawEvent,
    state::{DisconnectCause, HandshakeInfo},
    transport::SocketError,
};

/// Observer of connection occurrences. Every method defaults to doing nothing.
///
/// Callbacks of all listeners run one after another on a single dispatcher task,
/// in the order the underlying transitions happened.
#[async_trait]
pub trait ConnectionListener: Send + Sync {
    /// a transport is being opened
    async fn on_connecting(&self) {}

    /// handshake received
    async fn on_connected(&self, _info: &HandshakeInfo) {}

    /// connection went down
    async fn on_disconnected(&self, _cause: &DisconnectCause) {}

    /// application event received
    async fn on_event(&self, _event: &RawEvent) {}

    /// non fatal error, the connection stays up
    async fn on_error(&self, _error: &SocketError) {}
}

fn same(weak: &Weak<dyn ConnectionListener>, listener: &Arc<dyn ConnectionListener>) -> bool {
    weak.as_ptr() as *const () == Arc::as_ptr(listener) as *const ()
}

/// Mutex guarded set of listeners, holding only weak references.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: Mutex<Vec<Weak<dyn ConnectionListener>>>,
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("len", &self.listeners.lock().len())
            .finish()
    }
}

impl ListenerRegistry {
    /// Register a listener, adding the same one twice has no effect.
    pub fn add(&self, listener: &Arc<dyn ConnectionListener>) {
        let mut listeners = self.listeners.lock();
        if !listeners.iter().any(|w| same(w, listener)) {
            listeners.push(Arc::downgrade(listener));
        }
    }

    /// Unregister a listener.
    pub fn remove(&self, listener: &Arc<dyn ConnectionListener>) {
        self.listeners
            .lock()
            .retain(|w| !same(w, listener) && w.strong_count() > 0);
    }

    /// Live listeners at this instant. Dropped ones are pruned.
    pub fn snapshot(&self) -> Vec<Arc<dyn ConnectionListener>> {
        let mut listeners = self.listeners.lock();
        let mut alive = Vec::with_capacity(listeners.len());
        listeners.retain(|w| match w.upgrade() {
            Some(l) => {
                alive.push(l);
                true
            }
            None => false,
        });
        alive
    }

    /// number of registered listeners, dropped ones included until the next snapshot
    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    /// no listener registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Notification {
    Connecting,
    Connected(HandshakeInfo),
    Disconnected(DisconnectCause),
    Event(RawEvent),
    Error(SocketError),
}

impl Notification {
    async fn deliver(&self, listener: &dyn ConnectionListener) {
        match self {
            Self::Connecting => listener.on_connecting().await,
            Self::Connected(info) => listener.on_connected(info).await,
            Self::Disconnected(cause) => listener.on_disconnected(cause).await,
            Self::Event(event) => listener.on_event(event).await,
            Self::Error(err) => listener.on_error(err).await,
        }
    }
}

/// Start the dispatcher task, it ends when every sender is dropped.
pub(crate) fn spawn_dispatcher(
    registry: Arc<ListenerRegistry>,
) -> (mpsc::UnboundedSender<Notification>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<Notification>();

    let task = tokio::spawn(async move {
        log::debug!("Listener dispatcher start");

        while let Some(notification) = rx.recv().await {
            log::trace!("Dispatch {:?}", notification);
            for listener in registry.snapshot() {
                notification.deliver(listener.as_ref()).await;
            }
        }

        log::debug!("Listener dispatcher stop");
    });

    (tx, task)
}
