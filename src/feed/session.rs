//! Session manager: owns the current connection and the published state.
//!
//! Every state transition is an event on one queue consumed by a single
//! actor task, which is the only writer of [`SessionState`] and of the
//! current epoch. Connection tasks tag everything they report with the epoch
//! they were started for; anything tagged with a superseded epoch is dropped.

use super::connection::Connection;
use super::transport::{Transport, WsTransport};
use super::{heartbeat, receiver};
use crate::config::FeedConfig;
use crate::errors::AppError;
use crate::models::{Epoch, SessionState};
use crate::utils::backoff_delay;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, trace, warn};
use url::Url;

/// Why a connection was given up on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailureReason {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("receive failed: {0}")]
    Receive(String),
    #[error("closed by server")]
    ClosedByServer,
    #[error("heartbeat timed out")]
    HeartbeatTimeout,
}

#[derive(Debug)]
pub enum SessionEvent {
    Opened { epoch: Epoch },
    Published { epoch: Epoch, value: String },
    Closed { epoch: Epoch },
    Failed { epoch: Epoch, reason: FailureReason },
    Send(Message),
    Shutdown(oneshot::Sender<()>),
}

/// Event handle given to connection tasks. It does not keep the session alive.
#[derive(Debug, Clone)]
pub struct EventSender(mpsc::WeakUnboundedSender<SessionEvent>);

impl EventSender {
    pub fn new(tx: &mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self(tx.downgrade())
    }

    pub fn send(&self, event: SessionEvent) {
        if let Some(tx) = self.0.upgrade() {
            let _ = tx.send(event);
        }
    }
}

/// Read-only view of the current epoch.
#[derive(Debug, Clone)]
pub struct EpochWatch(watch::Receiver<Epoch>);

impl EpochWatch {
    pub fn new(rx: watch::Receiver<Epoch>) -> Self {
        Self(rx)
    }

    pub fn current(&self) -> Epoch {
        *self.0.borrow()
    }

    pub fn is_current(&self, epoch: Epoch) -> bool {
        self.current() == epoch
    }
}

/// Handle to a running feed session.
///
/// Cloning is cheap. Call [`FeedSession::shutdown`] to release the socket;
/// dropping every handle also tears the session down, but without waiting.
#[derive(Debug, Clone)]
pub struct FeedSession {
    events: mpsc::UnboundedSender<SessionEvent>,
    state: watch::Receiver<SessionState>,
    epochs: watch::Receiver<Epoch>,
}

impl FeedSession {
    /// Create epoch 1 and start connecting to `config.feed_url` over `transport`.
    pub fn start(config: FeedConfig, transport: Arc<dyn Transport>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionState::default());
        let (epoch_tx, epoch_rx) = watch::channel(Epoch::default());

        let mut manager = SessionManager {
            config,
            transport,
            state: state_tx,
            epoch: epoch_tx,
            events: EventSender::new(&events_tx),
            current: None,
            failed_attempts: 0,
        };
        manager.install();
        tokio::spawn(manager.run(events_rx));

        Self {
            events: events_tx,
            state: state_rx,
            epochs: epoch_rx,
        }
    }

    /// Start a session over a real WebSocket.
    pub fn connect(config: FeedConfig) -> Self {
        Self::start(config, Arc::new(WsTransport))
    }

    /// Change notifications for the published state.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn epochs(&self) -> watch::Receiver<Epoch> {
        self.epochs.clone()
    }

    pub fn current_epoch(&self) -> Epoch {
        *self.epochs.borrow()
    }

    /// Best-effort; failures are logged, never retried.
    pub fn send_text(&self, text: impl Into<String>) {
        self.dispatch(SessionEvent::Send(Message::Text(text.into())));
    }

    /// Best-effort; failures are logged, never retried.
    pub fn send_binary(&self, data: impl Into<Vec<u8>>) {
        self.dispatch(SessionEvent::Send(Message::Binary(data.into())));
    }

    pub fn on_open_confirmed(&self, epoch: Epoch) {
        self.dispatch(SessionEvent::Opened { epoch });
    }

    pub fn on_closed(&self, epoch: Epoch) {
        self.dispatch(SessionEvent::Closed { epoch });
    }

    pub fn on_failure(&self, epoch: Epoch, reason: FailureReason) {
        self.dispatch(SessionEvent::Failed { epoch, reason });
    }

    pub fn publish(&self, epoch: Epoch, value: impl Into<String>) {
        self.dispatch(SessionEvent::Published {
            epoch,
            value: value.into(),
        });
    }

    /// Close the current connection and wait for its receive loop to finish.
    /// No reconnect happens afterwards. Safe to call more than once.
    pub async fn shutdown(&self) {
        let (ack, done) = oneshot::channel();
        if self.events.send(SessionEvent::Shutdown(ack)).is_err() {
            return;
        }
        let _ = done.await;
    }

    fn dispatch(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            debug!("[FEED] session already shut down, dropping event");
        }
    }
}

struct ActiveConnection {
    conn: Arc<Connection>,
    /// Frames for this connection's writer, drained in order.
    outbound: mpsc::UnboundedSender<Message>,
    driver: JoinHandle<()>,
}

struct SessionManager {
    config: FeedConfig,
    transport: Arc<dyn Transport>,
    state: watch::Sender<SessionState>,
    epoch: watch::Sender<Epoch>,
    events: EventSender,
    current: Option<ActiveConnection>,
    failed_attempts: u32,
}

impl SessionManager {
    async fn run(mut self, mut events: mpsc::UnboundedReceiver<SessionEvent>) {
        while let Some(event) = events.recv().await {
            if self.handle(event).await.is_break() {
                return;
            }
        }
        debug!("[FEED] all session handles dropped");
        self.teardown().await;
    }

    async fn handle(&mut self, event: SessionEvent) -> ControlFlow<()> {
        match event {
            SessionEvent::Opened { epoch } => {
                if !self.is_current(epoch) {
                    debug!(%epoch, "[FEED] stale open confirmation");
                    return ControlFlow::Continue(());
                }
                self.failed_attempts = 0;
                self.publish(|s| !std::mem::replace(&mut s.is_connected, true));
                info!(%epoch, "[FEED] connected");
            }
            SessionEvent::Published { epoch, value } => {
                if !self.is_current(epoch) {
                    debug!(%epoch, %value, "[FEED] dropping stale value");
                    return ControlFlow::Continue(());
                }
                trace!(%epoch, %value, "[FEED] price");
                self.publish(|s| {
                    if s.latest_value.as_deref() == Some(value.as_str()) {
                        return false;
                    }
                    s.latest_value = Some(value);
                    true
                });
            }
            SessionEvent::Closed { epoch } => {
                self.replace(epoch, FailureReason::ClosedByServer).await;
            }
            SessionEvent::Failed { epoch, reason } => {
                self.replace(epoch, reason).await;
            }
            SessionEvent::Send(frame) => self.forward(frame),
            SessionEvent::Shutdown(ack) => {
                self.teardown().await;
                let _ = ack.send(());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    fn is_current(&self, epoch: Epoch) -> bool {
        self.current
            .as_ref()
            .is_some_and(|active| active.conn.epoch() == epoch)
    }

    /// Sole write path for the published state.
    fn publish(&self, update: impl FnOnce(&mut SessionState) -> bool) {
        self.state.send_if_modified(update);
    }

    /// Give up on `epoch` and open its successor.
    async fn replace(&mut self, epoch: Epoch, reason: FailureReason) {
        if !self.is_current(epoch) {
            debug!(%epoch, %reason, "[FEED] ignoring failure of superseded connection");
            return;
        }
        self.publish(|s| std::mem::replace(&mut s.is_connected, false));
        warn!(%epoch, %reason, "[FEED] connection lost, reconnecting");

        if let Some(old) = self.current.take() {
            old.conn.close().await;
        }
        self.failed_attempts = self.failed_attempts.saturating_add(1);
        self.install();
    }

    /// Create the next epoch's connection and spawn its driver.
    fn install(&mut self) {
        let epoch = self.epoch.borrow().next();
        let delay = backoff_delay(
            self.failed_attempts,
            self.config.reconnect_delay,
            self.config.max_reconnect_delay,
        );
        let conn = Arc::new(Connection::new(epoch, self.config.ping_threshold));
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        self.epoch.send_replace(epoch);

        let link = Link {
            transport: self.transport.clone(),
            url: self.config.feed_url.clone(),
            epochs: EpochWatch::new(self.epoch.subscribe()),
            events: self.events.clone(),
            heartbeat_interval: self.config.heartbeat_interval,
            outbound: outbound_rx,
        };
        let driver = tokio::spawn(drive(conn.clone(), link, delay));
        info!(%epoch, ?delay, url = %self.config.feed_url, "[FEED] opening connection");
        self.current = Some(ActiveConnection {
            conn,
            outbound,
            driver,
        });
    }

    /// Queue `frame` for the current connection. Frames sent while it is
    /// still opening go out once the handshake completes.
    fn forward(&self, frame: Message) {
        let Some(active) = &self.current else {
            warn!("[FEED] no connection, dropping outbound message");
            return;
        };
        if active.outbound.send(frame).is_err() {
            warn!(epoch = %active.conn.epoch(), "[FEED] connection already finished, dropping outbound message");
        }
    }

    async fn teardown(&mut self) {
        self.publish(|s| std::mem::replace(&mut s.is_connected, false));
        let Some(active) = self.current.take() else {
            return;
        };
        let epoch = active.conn.epoch();
        active.conn.close().await;
        if let Err(e) = active.driver.await {
            warn!(%epoch, error = %e, "[FEED] connection task ended abnormally");
        }
        info!(%epoch, "[FEED] session shut down");
    }
}

/// What a connection's tasks need from the session.
struct Link {
    transport: Arc<dyn Transport>,
    url: Url,
    epochs: EpochWatch,
    events: EventSender,
    heartbeat_interval: Duration,
    outbound: mpsc::UnboundedReceiver<Message>,
}

/// Per-connection driver: wait out the backoff, open, then run the receive
/// loop alongside a heartbeat monitor and the outbound writer. Both helpers
/// are stopped before the driver returns.
async fn drive(conn: Arc<Connection>, link: Link, delay: Duration) {
    let epoch = conn.epoch();
    if !delay.is_zero() {
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = conn.closed() => {
                debug!(%epoch, "[FEED] closed during reconnect backoff");
                return;
            }
        }
    }

    match conn.open(link.transport.as_ref(), &link.url).await {
        Ok(()) => {
            link.events.send(SessionEvent::Opened { epoch });
            let heartbeat = tokio::spawn(heartbeat::monitor(
                conn.clone(),
                link.epochs.clone(),
                link.events.clone(),
                link.heartbeat_interval,
            ));
            let writer = tokio::spawn(write_loop(conn.clone(), link.outbound));
            receiver::run(conn, link.epochs, link.events).await;

            heartbeat.abort();
            writer.abort();
            let _ = heartbeat.await;
            let _ = writer.await;
        }
        Err(AppError::ConnectionClosed) => {
            debug!(%epoch, "[FEED] closed before handshake completed");
        }
        Err(e) => {
            warn!(%epoch, error = %e, "[FEED] connect failed");
            link.events.send(SessionEvent::Failed {
                epoch,
                reason: FailureReason::Connect(e.to_string()),
            });
        }
    }
}

/// Writes queued frames one at a time so they reach the socket in send order.
async fn write_loop(conn: Arc<Connection>, mut outbound: mpsc::UnboundedReceiver<Message>) {
    while let Some(frame) = outbound.recv().await {
        if let Err(e) = conn.send(frame).await {
            warn!(epoch = %conn.epoch(), error = %e, "[FEED] send failed");
        }
    }
}
