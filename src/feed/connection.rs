//! A single physical socket tagged with its epoch.

use super::heartbeat::PingCounter;
use super::transport::{FrameSink, FrameStream, Transport};
use crate::errors::{AppError, Result};
use crate::models::{ConnectionState, Epoch};
use futures::{SinkExt, StreamExt};
use std::fmt;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;
use url::Url;

/// Upper bound on flushing the close frame.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Upper bound on a single frame write, lock wait included.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct Connection {
    epoch: Epoch,
    state: watch::Sender<ConnectionState>,
    sink: Mutex<Option<FrameSink>>,
    stream: Mutex<Option<FrameStream>>,
    pings: PingCounter,
}

impl Connection {
    pub fn new(epoch: Epoch, ping_threshold: u32) -> Self {
        let (state, _) = watch::channel(ConnectionState::Idle);
        Self {
            epoch,
            state,
            sink: Mutex::new(None),
            stream: Mutex::new(None),
            pings: PingCounter::new(ping_threshold),
        }
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn pings(&self) -> &PingCounter {
        &self.pings
    }

    /// Perform the handshake. Resolves with `ConnectionClosed` if `close` wins the race.
    pub async fn open(&self, transport: &dyn Transport, url: &Url) -> Result<()> {
        if !self.transition(ConnectionState::Idle, ConnectionState::Opening) {
            return Err(AppError::ConnectionClosed);
        }

        let connected = tokio::select! {
            res = transport.connect(url) => res,
            _ = self.closed() => return Err(AppError::ConnectionClosed),
        };
        let (sink, stream) = match connected {
            Ok(halves) => halves,
            Err(e) => {
                self.transition(ConnectionState::Opening, ConnectionState::Closed);
                return Err(e);
            }
        };

        *self.sink.lock().await = Some(sink);
        *self.stream.lock().await = Some(stream);

        if !self.transition(ConnectionState::Opening, ConnectionState::Open) {
            // closed while the halves were being installed
            self.sink.lock().await.take();
            self.stream.lock().await.take();
            return Err(AppError::ConnectionClosed);
        }
        Ok(())
    }

    /// Wait for the next frame. A concurrent `close` resolves this with `ConnectionClosed`.
    pub async fn receive_one(&self) -> Result<Message> {
        let mut guard = self.stream.lock().await;
        let stream = guard.as_mut().ok_or(AppError::NotConnected)?;

        tokio::select! {
            biased;
            _ = self.closed() => Err(AppError::ConnectionClosed),
            frame = stream.next() => match frame {
                Some(Ok(msg)) => Ok(msg),
                Some(Err(e)) => Err(e.into()),
                None => Err(AppError::ConnectionClosed),
            },
        }
    }

    /// Write one frame. A peer that stops draining the socket fails this with
    /// `WriteTimeout` instead of parking the caller forever.
    pub async fn send(&self, frame: Message) -> Result<()> {
        if self.state() != ConnectionState::Open {
            return Err(AppError::NotConnected);
        }
        let write = async {
            let mut guard = self.sink.lock().await;
            let sink = guard.as_mut().ok_or(AppError::NotConnected)?;
            sink.send(frame).await?;
            Ok::<(), AppError>(())
        };
        tokio::time::timeout(WRITE_TIMEOUT, write)
            .await
            .map_err(|_| AppError::WriteTimeout(WRITE_TIMEOUT))?
    }

    /// Send a heartbeat ping tagged with this connection's epoch.
    pub async fn ping(&self) -> Result<()> {
        self.send(Message::Ping(self.epoch.tag().to_vec())).await
    }

    /// Whether a pong payload answers one of our pings.
    pub fn is_own_pong(&self, payload: &[u8]) -> bool {
        payload == self.epoch.tag()
    }

    /// Idempotent; only the first caller flushes the close frame.
    pub async fn close(&self) {
        let started = self.state.send_if_modified(|s| {
            if s.is_terminal() {
                false
            } else {
                *s = ConnectionState::Closing;
                true
            }
        });
        if !started {
            return;
        }

        let flush = async {
            let sink = self.sink.lock().await.take();
            match sink {
                Some(mut sink) => sink.close().await,
                None => Ok(()),
            }
        };
        match tokio::time::timeout(CLOSE_TIMEOUT, flush).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(epoch = %self.epoch, error = %e, "[FEED] close frame failed"),
            Err(_) => debug!(epoch = %self.epoch, "[FEED] close frame timed out"),
        }
        self.state.send_replace(ConnectionState::Closed);
    }

    /// Resolves once the connection is closing or closed.
    pub async fn closed(&self) {
        let mut state_rx = self.state.subscribe();
        let _ = state_rx.wait_for(ConnectionState::is_terminal).await;
    }

    fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.state.send_if_modified(|s| {
            if *s == from {
                *s = to;
                true
            } else {
                false
            }
        })
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("epoch", &self.epoch)
            .field("state", &self.state())
            .field("pings", &self.pings.count())
            .finish()
    }
}
