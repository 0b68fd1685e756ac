use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};

use crate::{
    config::ConnectionConfig,
    health::HealthMonitor,
    listener::Notification,
    message::Message,
    observer::{
        CredentialManager, LifecycleHandler, LifecycleObserver, NetworkStateListener,
        NetworkStateProvider,
    },
    state::{ConnectionKind, Disconnected, Event, State, StateMachine},
    transport::{Frame, SocketError, Transport, TransportFactory, TransportSession},
};

/// Everything the reactor reacts to, in one ordered queue.
#[derive(Debug)]
pub(crate) enum Input {
    Event(Event),
    /// user disconnect, forgets the last config first
    Disconnect,
    Frame {
        generation: u64,
        frame: Frame,
    },
    /// health monitor wants a keepalive sent
    Keepalive,
}

/// The transport of the current attempt, shared with the public handle for `send_event`.
#[derive(Default)]
pub(crate) struct Slot {
    pub generation: u64,
    pub transport: Option<Arc<dyn Transport>>,
}

/// Turns network and lifecycle signals into events.
struct SignalBridge {
    inputs: mpsc::UnboundedSender<Input>,
}

impl SignalBridge {
    fn submit(&self, event: Event) {
        if self.inputs.send(Input::Event(event)).is_err() {
            log::debug!("Signal dropped, connection manager is closed");
        }
    }
}

#[async_trait]
impl NetworkStateListener for SignalBridge {
    async fn on_connected(&self) {
        self.submit(Event::NetworkAvailable)
    }

    async fn on_disconnected(&self) {
        self.submit(Event::NetworkNotAvailable)
    }
}

#[async_trait]
impl LifecycleHandler for SignalBridge {
    async fn resume(&self) {
        self.submit(Event::Resume)
    }

    async fn stopped(&self) {
        self.submit(Event::Stop)
    }
}

pub(crate) struct Collaborators {
    pub factory: Arc<dyn TransportFactory>,
    pub network: Arc<dyn NetworkStateProvider>,
    pub lifecycle: Arc<dyn LifecycleObserver>,
    pub credentials: Arc<dyn CredentialManager>,
}

/// Single owner of the state machine. Applies events one by one and runs the
/// effects of every state it enters.
pub(crate) struct Reactor {
    machine: StateMachine,
    state_tx: watch::Sender<State>,
    inputs: mpsc::UnboundedSender<Input>,
    notify: mpsc::UnboundedSender<Notification>,
    collaborators: Collaborators,
    network_listener: Arc<dyn NetworkStateListener>,
    lifecycle_handler: Arc<dyn LifecycleHandler>,
    network_bound: bool,
    lifecycle_bound: bool,
    monitor: HealthMonitor,
    last_config: Option<ConnectionConfig>,
    slot: Arc<Mutex<Slot>>,
    pump: Option<JoinHandle<()>>,
}

impl Reactor {
    pub fn new(
        machine: StateMachine,
        state_tx: watch::Sender<State>,
        inputs: mpsc::UnboundedSender<Input>,
        notify: mpsc::UnboundedSender<Notification>,
        collaborators: Collaborators,
        monitor: HealthMonitor,
        slot: Arc<Mutex<Slot>>,
    ) -> Self {
        let bridge = Arc::new(SignalBridge {
            inputs: inputs.clone(),
        });

        Self {
            machine,
            state_tx,
            inputs,
            notify,
            collaborators,
            network_listener: bridge.clone(),
            lifecycle_handler: bridge,
            network_bound: false,
            lifecycle_bound: false,
            monitor,
            last_config: None,
            slot,
            pump: None,
        }
    }

    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Input>) {
        log::debug!("Connection reactor start");

        while let Some(input) = rx.recv().await {
            match input {
                Input::Event(event) => self.submit(event),
                Input::Disconnect => {
                    self.last_config = None;
                    self.submit(Event::RequiredDisconnection);
                }
                Input::Frame { generation, frame } => self.on_frame(generation, frame).await,
                Input::Keepalive => self.send_keepalive(),
            }
        }

        log::debug!("Connection reactor stop");
    }

    fn submit(&mut self, event: Event) {
        let state = match self.machine.handle(&event) {
            Some(state) => state.clone(),
            None => return,
        };

        self.state_tx.send_replace(state.clone());
        self.enter(state);
    }

    /// Queue a follow up event behind whatever is already waiting.
    fn queue(&self, event: Event) {
        log::trace!("Queue follow up event {}", event.name());
        // the reactor holds its own receiver, so this only fails while shutting down
        let _ = self.inputs.send(Input::Event(event));
    }

    fn notify(&self, notification: Notification) {
        if self.notify.send(notification).is_err() {
            log::debug!("Listener dispatcher is gone, notification dropped");
        }
    }

    fn enter(&mut self, state: State) {
        match state {
            State::Connecting(config, kind) => self.on_connecting(config, kind),
            State::Connected(info) => {
                self.monitor.start();
                self.notify(Notification::Connected(info));
            }
            State::Disconnected(disconnected) => self.on_disconnected(disconnected),
            State::RestartConnection => match self.last_config.clone() {
                Some(config) => {
                    self.queue(Event::Connect(config, ConnectionKind::AutomaticReconnect))
                }
                None => log::debug!("Nothing to restart, no connection was requested"),
            },
        }
    }

    fn on_connecting(&mut self, config: ConnectionConfig, kind: ConnectionKind) {
        self.notify(Notification::Connecting);
        self.close_session();
        // a retry armed by an earlier failure must not replace this attempt
        self.monitor.stop();

        let attempt = match kind {
            ConnectionKind::Initial => {
                self.bind_observers();
                config.clone()
            }
            ConnectionKind::AutomaticReconnect | ConnectionKind::ForcedReconnect => {
                self.ensure_network();
                config.as_reconnect()
            }
        };
        self.last_config = Some(config);

        if self.collaborators.network.is_connected() {
            self.open(attempt);
        } else {
            log::debug!("Network is not available, skip opening transport");
            self.queue(Event::NetworkNotAvailable);
        }
    }

    fn on_disconnected(&mut self, disconnected: Disconnected) {
        self.close_session();

        match disconnected {
            Disconnected::Stopped => {
                self.monitor.stop();
                self.unbind_network();
            }
            Disconnected::NetworkDisconnected => self.monitor.stop(),
            Disconnected::WebSocketEventLost => {
                self.monitor.stop();
                match self.last_config.clone() {
                    Some(config) => {
                        self.queue(Event::Connect(config, ConnectionKind::AutomaticReconnect))
                    }
                    None => log::debug!("No connection to resume after event loss"),
                }
            }
            Disconnected::ByRequest | Disconnected::Permanently(_) => {
                self.monitor.stop();
                self.unbind_network();
                self.unbind_lifecycle();
            }
            Disconnected::Temporarily(_) => self.monitor.on_disconnected(),
        }

        self.notify(Notification::Disconnected(disconnected.cause()));
    }

    async fn on_frame(&mut self, generation: u64, frame: Frame) {
        let current = self.slot.lock().generation;
        if generation != current {
            log::trace!("Drop frame of stale transport {}", generation);
            return;
        }

        match frame {
            Frame::Message(Message::Connected(info)) => {
                self.submit(Event::ConnectionEstablished(info))
            }
            Frame::Message(Message::HealthCheck(_)) => self.monitor.ack(),
            Frame::Message(Message::Event(event)) => {
                self.monitor.ack();
                self.notify(Notification::Event(event));
            }
            Frame::Error(err) if !err.is_fatal() => {
                log::warn!("Ignore broken frame: {}", err);
                self.notify(Notification::Error(err));
            }
            Frame::Error(err) if err.is_unrecoverable() => {
                log::warn!("Unrecoverable transport error: {}", err);
                self.collaborators.credentials.expire_token().await;
                self.submit(Event::UnrecoverableError(err));
            }
            Frame::Error(err) => {
                log::warn!("Transport error: {}", err);
                self.submit(Event::NetworkError(err));
            }
        }
    }

    fn send_keepalive(&self) {
        let id = match self.machine.state() {
            State::Connected(info) => info.connection_id.clone(),
            _ => return,
        };

        let transport = self.slot.lock().transport.clone();
        match transport {
            Some(t) if t.send(&Message::health_check(&id)) => {}
            _ => log::debug!("Keepalive not sent, transport is closed"),
        }
    }

    fn open(&mut self, config: ConnectionConfig) {
        let generation = self.slot.lock().generation;

        self.pump = Some(tokio::spawn(pump(
            self.collaborators.factory.clone(),
            config,
            generation,
            self.slot.clone(),
            self.inputs.clone(),
        )));
    }

    /// Abort any attempt in flight and close the open transport.
    fn close_session(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }

        let transport = {
            let mut slot = self.slot.lock();
            slot.generation += 1;
            slot.transport.take()
        };

        if let Some(transport) = transport {
            log::debug!("Close transport");
            transport.close();
        }
    }

    fn bind_observers(&mut self) {
        self.unbind_lifecycle();
        self.collaborators
            .lifecycle
            .observe(self.lifecycle_handler.clone());
        self.lifecycle_bound = true;

        self.unbind_network();
        self.ensure_network();
    }

    fn ensure_network(&mut self) {
        if !self.network_bound {
            self.collaborators
                .network
                .subscribe(self.network_listener.clone());
            self.network_bound = true;
        }
    }

    fn unbind_network(&mut self) {
        if self.network_bound {
            self.collaborators
                .network
                .unsubscribe(&self.network_listener);
            self.network_bound = false;
        }
    }

    fn unbind_lifecycle(&mut self) {
        if self.lifecycle_bound {
            self.collaborators
                .lifecycle
                .dispose(&self.lifecycle_handler);
            self.lifecycle_bound = false;
        }
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        self.close_session();
        self.unbind_network();
        self.unbind_lifecycle();
    }
}

/// Open one transport and forward its frames, tagged with the attempt generation.
async fn pump(
    factory: Arc<dyn TransportFactory>,
    config: ConnectionConfig,
    generation: u64,
    slot: Arc<Mutex<Slot>>,
    inputs: mpsc::UnboundedSender<Input>,
) {
    log::debug!("Opening transport {} for {}", generation, config);

    let TransportSession {
        transport,
        mut frames,
    } = match factory.open(&config).await {
        Ok(session) => session,
        Err(err) => {
            log::debug!("Open transport {} failed: {}", generation, err);
            let _ = inputs.send(Input::Frame {
                generation,
                frame: Frame::Error(err),
            });
            return;
        }
    };

    {
        let mut slot = slot.lock();
        if slot.generation != generation {
            log::debug!("Transport {} superseded while opening", generation);
            transport.close();
            return;
        }
        slot.transport = Some(transport);
    }

    while let Some(frame) = frames.next().await {
        let fatal = matches!(frame, Frame::Error(ref err) if err.is_fatal());
        if inputs.send(Input::Frame { generation, frame }).is_err() || fatal {
            return;
        }
    }

    log::debug!("Frame stream of transport {} ended", generation);
    let _ = inputs.send(Input::Frame {
        generation,
        frame: Frame::Error(SocketError::closed()),
    });
}
