//! Keepalive scheduling and dead connection detection.

use std::{fmt::Debug, sync::Arc};

use backoff::{backoff::Backoff, ExponentialBackoff};
use parking_lot::Mutex;
use tokio::{sync::watch, task::JoinHandle, time::Instant};

use crate::config::{HeartbeatConfig, RetryConfig};

/// Callback type used by the monitor.
pub type Callback = Arc<dyn Fn() + Send + Sync>;

struct Session {
    task: JoinHandle<()>,
    ack_tx: watch::Sender<()>,
}

struct Inner {
    // bumped on every stop, background tasks only fire for the epoch they were started in
    epoch: u64,
    session: Option<Session>,
    retry: Option<JoinHandle<()>>,
    backoff: ExponentialBackoff,
    failures: u32,
}

impl Inner {
    fn cancel(&mut self) {
        self.epoch += 1;
        if let Some(session) = self.session.take() {
            session.task.abort();
        }
        if let Some(retry) = self.retry.take() {
            retry.abort();
        }
    }
}

/// Sends keepalives while connected and reports a connection presumed dead.
///
/// Two callbacks are wired in at construction: `keepalive` sends one heartbeat frame,
/// `reconnect` asks for a new connection. `reconnect` fires at most once per
/// [`start`](Self::start) or [`on_disconnected`](Self::on_disconnected), and never after
/// [`stop`](Self::stop).
pub struct HealthMonitor {
    heartbeat: HeartbeatConfig,
    retry: RetryConfig,
    keepalive: Callback,
    reconnect: Callback,
    inner: Arc<Mutex<Inner>>,
}

impl Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("HealthMonitor")
            .field("heartbeat", &self.heartbeat)
            .field("retry", &self.retry)
            .field("running", &inner.session.is_some())
            .field("retry_pending", &inner.retry.is_some())
            .field("failures", &inner.failures)
            .finish()
    }
}

impl HealthMonitor {
    /// Create a stopped monitor.
    pub fn new(
        heartbeat: HeartbeatConfig,
        retry: RetryConfig,
        keepalive: Callback,
        reconnect: Callback,
    ) -> Self {
        let backoff = ExponentialBackoff::from(&retry);
        Self {
            heartbeat,
            retry,
            keepalive,
            reconnect,
            inner: Arc::new(Mutex::new(Inner {
                epoch: 0,
                session: None,
                retry: None,
                backoff,
                failures: 0,
            })),
        }
    }

    /// Begin a keepalive session for a fresh connection, the failure counter is reset.
    ///
    /// Must be called inside a tokio runtime.
    pub fn start(&self) {
        let mut inner = self.inner.lock();
        inner.cancel();
        inner.failures = 0;
        inner.backoff.reset();

        let (ack_tx, ack_rx) = watch::channel(());
        let task = tokio::spawn(watch_session(
            self.heartbeat.clone(),
            ack_rx,
            inner.epoch,
            self.inner.clone(),
            self.keepalive.clone(),
            self.reconnect.clone(),
        ));

        log::debug!("Health monitor session {} started", inner.epoch);

        inner.session = Some(Session { task, ack_tx });
    }

    /// Some inbound frame arrived, the connection is alive.
    pub fn ack(&self) {
        let inner = self.inner.lock();
        if let Some(ref session) = inner.session {
            log::trace!("Health monitor ack");
            // receiver is gone only when the session already gave up
            let _ = session.ack_tx.send(());
        }
    }

    /// Cancel the keepalive session and any pending retry.
    pub fn stop(&self) {
        let mut inner = self.inner.lock();
        if inner.session.is_some() || inner.retry.is_some() {
            log::debug!("Health monitor stopped");
        }
        inner.cancel();
    }

    /// The connection failed with a recoverable error, schedule one retry after a backoff.
    pub fn on_disconnected(&self) {
        let mut inner = self.inner.lock();
        inner.cancel();

        if !self.retry.enabled {
            log::debug!("Automatic retry is disabled");
            return;
        }

        if let Some(max) = self.retry.max_attempts {
            if inner.failures >= max {
                log::warn!("Give up retrying after {} consecutive failures", inner.failures);
                return;
            }
        }

        inner.failures += 1;
        let delay = inner
            .backoff
            .next_backoff()
            .unwrap_or(self.retry.max_backoff);

        log::debug!(
            "Retry connection in {:?}, consecutive failures: {}",
            delay,
            inner.failures
        );

        let epoch = inner.epoch;
        let shared = self.inner.clone();
        let reconnect = self.reconnect.clone();
        inner.retry = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let inner = shared.lock();
            if inner.epoch == epoch {
                reconnect();
            }
        }));
    }

    /// consecutive failures since the last successful connection
    pub fn failures(&self) -> u32 {
        self.inner.lock().failures
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.inner.lock().cancel();
    }
}

async fn watch_session(
    config: HeartbeatConfig,
    mut ack_rx: watch::Receiver<()>,
    epoch: u64,
    shared: Arc<Mutex<Inner>>,
    keepalive: Callback,
    reconnect: Callback,
) {
    let mut ping_time = Instant::now() + config.interval;
    let mut ack_deadline: Option<Instant> = None;
    let mut missed = 0;

    loop {
        let need_ping = tokio::time::sleep_until(ping_time);
        let ack_timeout = tokio::time::sleep_until(ack_deadline.unwrap_or(ping_time));

        tokio::select! {
            biased;

            changed = ack_rx.changed() => {
                if changed.is_err() {
                    log::debug!("Health monitor dropped, stop session {}", epoch);
                    break
                }
                missed = 0;
                ack_deadline = None;
            }

            _ = ack_timeout, if ack_deadline.is_some() => {
                missed += 1;
                ack_deadline = None;
                log::warn!("Keepalive not acknowledged, missed {}/{}", missed, config.max_missed);

                if missed >= config.max_missed {
                    let inner = shared.lock();
                    if inner.epoch == epoch {
                        log::warn!("Connection presumed dead, request reconnect");
                        reconnect();
                    }
                    break
                }
            }

            _ = need_ping => {
                log::trace!("Send keepalive");
                keepalive();
                ping_time = Instant::now() + config.interval;
                if ack_deadline.is_none() {
                    ack_deadline = Some(Instant::now() + config.ack_timeout);
                }
            }
        }
    }
}
