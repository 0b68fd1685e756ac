//! Public connection handle.

mod reactor;

use std::{fmt::Debug, sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};

use crate::{
    config::{Settings, User},
    error,
    health::HealthMonitor,
    listener::{spawn_dispatcher, ConnectionListener, ListenerRegistry},
    message::{Message, RawEvent},
    observer::{
        AlwaysOnline, CredentialManager, Foreground, LifecycleObserver, NetworkStateProvider,
        StaticToken,
    },
    state::{ConnectionKind, Event, State, StateMachine, UnhandledHook},
    transport::TransportFactory,
    ws::WebSocketFactory,
    Result,
};
use reactor::{Collaborators, Input, Reactor, Slot};

/// Default timeout for [`ConnectionManager::await_connection`].
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(60);

/// Builder of [`ConnectionManager`], every collaborator has a trivial default.
pub struct ConnectionManagerBuilder {
    settings: Settings,
    factory: Option<Arc<dyn TransportFactory>>,
    network: Arc<dyn NetworkStateProvider>,
    lifecycle: Arc<dyn LifecycleObserver>,
    credentials: Arc<dyn CredentialManager>,
    on_unhandled: Option<UnhandledHook>,
}

impl Debug for ConnectionManagerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManagerBuilder")
            .field("settings", &self.settings)
            .field("custom_transport", &self.factory.is_some())
            .field("on_unhandled", &self.on_unhandled.is_some())
            .finish_non_exhaustive()
    }
}

impl ConnectionManagerBuilder {
    /// Use a custom transport instead of the websocket one.
    pub fn transport(mut self, factory: Arc<dyn TransportFactory>) -> Self {
        self.factory.replace(factory);
        self
    }

    /// Set connectivity source, defaults to [`AlwaysOnline`].
    pub fn network(mut self, network: Arc<dyn NetworkStateProvider>) -> Self {
        self.network = network;
        self
    }

    /// Set app lifecycle source, defaults to [`Foreground`].
    pub fn lifecycle(mut self, lifecycle: Arc<dyn LifecycleObserver>) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    /// Set token owner, defaults to no token.
    pub fn credentials(mut self, credentials: Arc<dyn CredentialManager>) -> Self {
        self.credentials = credentials;
        self
    }

    /// Get notified of every event the current state does not declare.
    pub fn on_unhandled_event<F>(mut self, hook: F) -> Self
    where
        F: Fn(&State, &Event) + Send + Sync + 'static,
    {
        self.on_unhandled.replace(Box::new(hook));
        self
    }

    /// Start the manager in `Disconnected.Stopped`.
    ///
    /// Spawns background tasks, so it must be called inside a tokio runtime.
    pub fn build(self) -> ConnectionManager {
        let factory: Arc<dyn TransportFactory> = match self.factory {
            Some(factory) => factory,
            None => Arc::new(WebSocketFactory::new(self.credentials.clone())),
        };

        let (inputs, inputs_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(State::default());
        let listeners = Arc::new(ListenerRegistry::default());
        let (notify, dispatcher) = spawn_dispatcher(listeners.clone());
        let slot = Arc::new(Mutex::new(Slot::default()));

        let mut machine = StateMachine::default();
        if let Some(hook) = self.on_unhandled {
            machine.set_unhandled_hook(hook);
        }

        let keepalive_tx = inputs.clone();
        let reconnect_tx = inputs.clone();
        let monitor = HealthMonitor::new(
            self.settings.heartbeat.clone(),
            self.settings.retry.clone(),
            Arc::new(move || {
                let _ = keepalive_tx.send(Input::Keepalive);
            }),
            Arc::new(move || {
                let _ = reconnect_tx.send(Input::Event(Event::WebSocketEventLost));
            }),
        );

        let reactor = Reactor::new(
            machine,
            state_tx,
            inputs.clone(),
            notify,
            Collaborators {
                factory,
                network: self.network,
                lifecycle: self.lifecycle,
                credentials: self.credentials,
            },
            monitor,
            slot.clone(),
        );
        let reactor = tokio::spawn(reactor.run(inputs_rx));

        log::debug!("Connection manager for {} created", self.settings.endpoint);

        ConnectionManager {
            settings: self.settings,
            inputs,
            state,
            listeners,
            slot,
            reactor,
            dispatcher,
        }
    }
}

/// Owner of one realtime connection.
///
/// All operations only enqueue work for the internal reactor and return
/// immediately, so every method is safe to call from any task.
pub struct ConnectionManager {
    settings: Settings,
    inputs: mpsc::UnboundedSender<Input>,
    state: watch::Receiver<State>,
    listeners: Arc<ListenerRegistry>,
    slot: Arc<Mutex<Slot>>,
    reactor: JoinHandle<()>,
    dispatcher: JoinHandle<()>,
}

impl Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("endpoint", &self.settings.endpoint.as_str())
            .field("state", &*self.state.borrow())
            .field("listeners", &self.listeners)
            .finish()
    }
}

impl ConnectionManager {
    /// Start building a manager.
    pub fn builder(settings: Settings) -> ConnectionManagerBuilder {
        ConnectionManagerBuilder {
            settings,
            factory: None,
            network: Arc::new(AlwaysOnline),
            lifecycle: Arc::new(Foreground),
            credentials: Arc::new(StaticToken::none()),
            on_unhandled: None,
        }
    }

    fn submit(&self, input: Input) {
        if self.inputs.send(input).is_err() {
            log::warn!("Connection reactor is gone, input dropped");
        }
    }

    /// Connect as the user.
    pub fn connect_user(&self, user: User, anonymous: bool) {
        let config = self.settings.connection(user, anonymous);
        log::debug!("Connect user requested: {}", config);
        self.submit(Input::Event(Event::Connect(config, ConnectionKind::Initial)));
    }

    /// Close the connection and forget it, nothing reconnects until the next connect call.
    pub fn disconnect(&self) {
        log::debug!("Disconnect requested");
        self.submit(Input::Disconnect);
    }

    /// Reconnect as the user.
    ///
    /// A non forced reconnect never overrides a user disconnect or a permanent failure.
    pub fn reconnect_user(&self, user: User, anonymous: bool, forced: bool) {
        let kind = if forced {
            ConnectionKind::ForcedReconnect
        } else {
            ConnectionKind::AutomaticReconnect
        };
        let config = self.settings.connection(user, anonymous);
        log::debug!("Reconnect user requested ({:?}): {}", kind, config);
        self.submit(Input::Event(Event::Connect(config, kind)));
    }

    /// Check if the connection is established.
    pub fn is_connected(&self) -> bool {
        self.state.borrow().is_connected()
    }

    /// Snapshot of current state.
    pub fn state(&self) -> State {
        self.state.borrow().clone()
    }

    /// Wait until connected, only the calling task is suspended.
    pub async fn await_connection(&self, timeout: Duration) -> Result<()> {
        let mut state = self.state.clone();
        let waited = tokio::time::timeout(timeout, async {
            state.wait_for(State::is_connected).await.map(|_| ())
        })
        .await;

        match waited {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => error::ManagerClosed.fail(),
            Err(_) => error::ConnectionTimeout { timeout }.fail(),
        }
    }

    /// Server assigned id of the current connection.
    pub fn connection_id(&self) -> Result<String> {
        let state = self.state.borrow();
        match state.handshake() {
            Some(info) => Ok(info.connection_id.clone()),
            None => error::NotConnected {
                state: state.to_string(),
            }
            .fail(),
        }
    }

    /// Register a listener. Only a weak reference is kept, the caller owns the listener.
    pub fn add_listener(&self, listener: &Arc<dyn ConnectionListener>) {
        self.listeners.add(listener)
    }

    /// Unregister a listener.
    pub fn remove_listener(&self, listener: &Arc<dyn ConnectionListener>) {
        self.listeners.remove(listener)
    }

    /// Send an application event, false when not connected.
    pub fn send_event(&self, event: RawEvent) -> bool {
        if !self.is_connected() {
            log::debug!("Drop outbound {} event, not connected", event.kind);
            return false;
        }

        let transport = self.slot.lock().transport.clone();
        transport
            .map(|t| t.send(&Message::Event(event)))
            .unwrap_or(false)
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.reactor.abort();
        self.dispatcher.abort();
    }
}
