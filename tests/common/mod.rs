#![allow(dead_code)]

use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use sockstate::{
    listener::ConnectionListener,
    observer::{
        CredentialManager, LifecycleHandler, LifecycleObserver, NetworkStateListener,
        NetworkStateProvider,
    },
    transport::{Transport, TransportFactory, TransportSession},
    ConnectionConfig, ConnectionManager, DisconnectCause, Frame, HandshakeInfo, Message, RawEvent,
    Settings, SocketError,
};

pub fn init_logger() {
    let _ = pretty_env_logger::try_init();
}

pub fn settings() -> Settings {
    Settings::new("wss://chat.example.com/connect", "app-key").unwrap()
}

pub fn handshake(id: &str) -> Frame {
    Frame::Message(Message::Connected(HandshakeInfo {
        connection_id: id.to_string(),
        me: None,
        created_at: None,
    }))
}

/// Server side of one mock connection.
pub struct ServerHandle {
    tx: mpsc::UnboundedSender<Frame>,
    pub sent: Arc<Mutex<Vec<Message>>>,
    pub closed: Arc<AtomicBool>,
}

impl ServerHandle {
    pub fn push(&self, frame: Frame) {
        let _ = self.tx.send(frame);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<Message> {
        self.sent.lock().clone()
    }
}

struct MockTransport {
    sent: Arc<Mutex<Vec<Message>>>,
    closed: Arc<AtomicBool>,
}

impl Transport for MockTransport {
    fn send(&self, message: &Message) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        self.sent.lock().push(message.clone());
        true
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Records every open and hands out scripted sessions.
#[derive(Default)]
pub struct MockFactory {
    auto_handshake: bool,
    opens: Mutex<Vec<ConnectionConfig>>,
    servers: Mutex<Vec<Arc<ServerHandle>>>,
    fail_next: Mutex<Option<SocketError>>,
}

impl MockFactory {
    /// Every session sends `conn-N` handshake right after opening.
    pub fn handshaking() -> Self {
        Self {
            auto_handshake: true,
            ..Default::default()
        }
    }

    pub fn silent() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, err: SocketError) {
        self.fail_next.lock().replace(err);
    }

    pub fn opens(&self) -> Vec<ConnectionConfig> {
        self.opens.lock().clone()
    }

    pub fn server(&self, index: usize) -> Arc<ServerHandle> {
        self.servers.lock()[index].clone()
    }
}

#[async_trait]
impl TransportFactory for MockFactory {
    async fn open(&self, config: &ConnectionConfig) -> Result<TransportSession, SocketError> {
        let n = {
            let mut opens = self.opens.lock();
            opens.push(config.clone());
            opens.len()
        };

        if let Some(err) = self.fail_next.lock().take() {
            return Err(err);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let server = Arc::new(ServerHandle {
            tx,
            sent: Arc::default(),
            closed: Arc::default(),
        });

        if self.auto_handshake {
            server.push(handshake(&format!("conn-{}", n)));
        }

        self.servers.lock().push(server.clone());

        let frames = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|frame| (frame, rx))
        })
        .boxed();

        Ok(TransportSession {
            transport: Arc::new(MockTransport {
                sent: server.sent.clone(),
                closed: server.closed.clone(),
            }),
            frames,
        })
    }
}

#[derive(Default)]
pub struct FakeNetwork {
    offline: AtomicBool,
    listeners: Mutex<Vec<Arc<dyn NetworkStateListener>>>,
    pub subscribes: AtomicUsize,
}

impl FakeNetwork {
    pub fn subscribed(&self) -> usize {
        self.listeners.lock().len()
    }

    pub async fn set_online(&self, online: bool) {
        self.offline.store(!online, Ordering::SeqCst);
        let listeners = self.listeners.lock().clone();
        for l in listeners {
            if online {
                l.on_connected().await;
            } else {
                l.on_disconnected().await;
            }
        }
    }
}

impl NetworkStateProvider for FakeNetwork {
    fn is_connected(&self) -> bool {
        !self.offline.load(Ordering::SeqCst)
    }

    fn subscribe(&self, listener: Arc<dyn NetworkStateListener>) {
        self.subscribes.fetch_add(1, Ordering::SeqCst);
        self.listeners.lock().push(listener);
    }

    fn unsubscribe(&self, listener: &Arc<dyn NetworkStateListener>) {
        self.listeners.lock().retain(|l| !Arc::ptr_eq(l, listener));
    }
}

#[derive(Default)]
pub struct FakeLifecycle {
    handlers: Mutex<Vec<Arc<dyn LifecycleHandler>>>,
}

impl FakeLifecycle {
    pub fn observed(&self) -> usize {
        self.handlers.lock().len()
    }

    pub async fn background(&self) {
        let handlers = self.handlers.lock().clone();
        for h in handlers {
            h.stopped().await;
        }
    }

    pub async fn foreground(&self) {
        let handlers = self.handlers.lock().clone();
        for h in handlers {
            h.resume().await;
        }
    }
}

impl LifecycleObserver for FakeLifecycle {
    fn observe(&self, handler: Arc<dyn LifecycleHandler>) {
        self.handlers.lock().push(handler);
    }

    fn dispose(&self, handler: &Arc<dyn LifecycleHandler>) {
        self.handlers.lock().retain(|h| !Arc::ptr_eq(h, handler));
    }
}

#[derive(Default)]
pub struct CountingCredentials {
    pub expired: AtomicUsize,
}

impl CountingCredentials {
    pub fn expired(&self) -> usize {
        self.expired.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialManager for CountingCredentials {
    async fn token(&self) -> Option<String> {
        Some("jwt-token".to_string())
    }

    async fn expire_token(&self) {
        self.expired.fetch_add(1, Ordering::SeqCst);
    }
}

/// Listener writing every callback as one line.
#[derive(Default)]
pub struct Recorder {
    log: Mutex<Vec<String>>,
}

impl Recorder {
    pub fn log(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    pub fn count(&self, line: &str) -> usize {
        self.log.lock().iter().filter(|l| *l == line).count()
    }
}

fn cause(cause: &DisconnectCause) -> String {
    match cause {
        DisconnectCause::ConnectionReleased => "ConnectionReleased".to_string(),
        DisconnectCause::NetworkNotAvailable => "NetworkNotAvailable".to_string(),
        DisconnectCause::UnrecoverableError(e) => format!("Unrecoverable({})", e.code),
        DisconnectCause::Error(e) => format!("Error({})", e.code),
        DisconnectCause::WebSocketNotAvailable => "WebSocketNotAvailable".to_string(),
    }
}

#[async_trait]
impl ConnectionListener for Recorder {
    async fn on_connecting(&self) {
        self.log.lock().push("connecting".to_string());
    }

    async fn on_connected(&self, info: &HandshakeInfo) {
        self.log
            .lock()
            .push(format!("connected:{}", info.connection_id));
    }

    async fn on_disconnected(&self, c: &DisconnectCause) {
        self.log.lock().push(format!("disconnected:{}", cause(c)));
    }

    async fn on_event(&self, event: &RawEvent) {
        self.log.lock().push(format!("event:{}", event.kind));
    }

    async fn on_error(&self, error: &SocketError) {
        self.log.lock().push(format!("error:{}", error.code));
    }
}

pub struct Harness {
    pub manager: ConnectionManager,
    pub factory: Arc<MockFactory>,
    pub network: Arc<FakeNetwork>,
    pub lifecycle: Arc<FakeLifecycle>,
    pub credentials: Arc<CountingCredentials>,
    pub recorder: Arc<Recorder>,
}

impl Harness {
    pub fn new(factory: MockFactory) -> Self {
        Self::with_settings(factory, settings())
    }

    pub fn with_settings(factory: MockFactory, settings: Settings) -> Self {
        init_logger();

        let factory = Arc::new(factory);
        let network = Arc::new(FakeNetwork::default());
        let lifecycle = Arc::new(FakeLifecycle::default());
        let credentials = Arc::new(CountingCredentials::default());
        let recorder = Arc::new(Recorder::default());

        let manager = ConnectionManager::builder(settings)
            .transport(factory.clone())
            .network(network.clone())
            .lifecycle(lifecycle.clone())
            .credentials(credentials.clone())
            .build();

        let listener: Arc<dyn ConnectionListener> = recorder.clone();
        manager.add_listener(&listener);

        Self {
            manager,
            factory,
            network,
            lifecycle,
            credentials,
            recorder,
        }
    }

    pub fn log(&self) -> Vec<String> {
        self.recorder.log()
    }
}

/// Poll until the condition holds, panic after a while.
pub async fn eventually<F: Fn() -> bool>(f: F) {
    for _ in 0..200 {
        if f() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}

/// Let every runnable task make progress.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
