//! In-memory transport for exercising the session without a network.

use super::transport::{FrameSink, FrameStream, Transport};
use crate::errors::Result;
use async_trait::async_trait;
use futures::channel::mpsc as fmpsc;
use futures::{SinkExt, StreamExt};
use std::io;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use url::Url;

/// Hands the far end of every accepted connection to the test.
pub(crate) struct MockTransport {
    peers: mpsc::UnboundedSender<MockPeer>,
    refusals: AtomicU32,
    connects: AtomicU32,
}

impl MockTransport {
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<MockPeer>) {
        let (peers, rx) = mpsc::unbounded_channel();
        let transport = Self {
            peers,
            refusals: AtomicU32::new(0),
            connects: AtomicU32::new(0),
        };
        (transport, rx)
    }

    /// Fail the next handshake.
    pub(crate) fn refuse_next(&self) {
        self.refusals.fetch_add(1, Ordering::SeqCst);
    }

    /// Handshakes attempted so far, refused ones included.
    pub(crate) fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, _url: &Url) -> Result<(FrameSink, FrameStream)> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .refusals
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            let err = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
            return Err(WsError::Io(err).into());
        }

        let (in_tx, in_rx) = fmpsc::unbounded();
        let (out_tx, out_rx) = fmpsc::unbounded();
        let _ = self.peers.send(MockPeer {
            inbound: in_tx,
            outbound: out_rx,
        });

        let sink = out_tx.sink_map_err(|_| WsError::ConnectionClosed);
        Ok((Box::pin(sink), in_rx.boxed()))
    }
}

type Inbound = fmpsc::UnboundedSender<std::result::Result<Message, WsError>>;

/// Accepts connections whose peer never reads: the first frame is buffered and
/// every later write stays pending. Nothing is ever received either.
#[derive(Default)]
pub(crate) struct StalledTransport {
    connects: AtomicU32,
    held: Mutex<Vec<(fmpsc::Receiver<Message>, Inbound)>>,
}

impl StalledTransport {
    pub(crate) fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for StalledTransport {
    async fn connect(&self, _url: &Url) -> Result<(FrameSink, FrameStream)> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let (in_tx, in_rx) = fmpsc::unbounded();
        let (out_tx, out_rx) = fmpsc::channel(0);
        self.held.lock().unwrap().push((out_rx, in_tx));

        let sink = out_tx.sink_map_err(|_| WsError::ConnectionClosed);
        Ok((Box::pin(sink), in_rx.boxed()))
    }
}

/// The server side of one mock connection.
pub(crate) struct MockPeer {
    inbound: Inbound,
    outbound: fmpsc::UnboundedReceiver<Message>,
}

impl MockPeer {
    pub(crate) fn push(&self, msg: Message) {
        let _ = self.inbound.unbounded_send(Ok(msg));
    }

    pub(crate) fn push_text(&self, text: &str) {
        self.push(Message::Text(text.to_string()));
    }

    /// Surface a transport error on the client's read half.
    pub(crate) fn fail(&self) {
        let err = io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer");
        let _ = self.inbound.unbounded_send(Err(WsError::Io(err)));
    }

    /// Next frame written by the client; `None` once the client closed its sink.
    pub(crate) async fn next_outbound(&mut self) -> Option<Message> {
        self.outbound.next().await
    }

    /// Wait for a ping and echo its payload back as a pong.
    pub(crate) async fn answer_ping(&mut self) -> bool {
        while let Some(frame) = self.outbound.next().await {
            if let Message::Ping(payload) = frame {
                self.push(Message::Pong(payload));
                return true;
            }
        }
        false
    }
}
