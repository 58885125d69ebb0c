//! WebSocket transport boundary.

use crate::errors::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{Sink, StreamExt};
use std::pin::Pin;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::debug;
use url::Url;

/// Write half of an open socket.
pub type FrameSink = Pin<Box<dyn Sink<Message, Error = WsError> + Send>>;

/// Read half of an open socket.
pub type FrameStream = BoxStream<'static, std::result::Result<Message, WsError>>;

/// Anything that can open a WebSocket and hand back its two halves.
///
/// Framing, TLS and compression stay on the far side of this trait.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn connect(&self, url: &Url) -> Result<(FrameSink, FrameStream)>;
}

/// Default transport backed by `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsTransport;

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self, url: &Url) -> Result<(FrameSink, FrameStream)> {
        let (ws_stream, resp) = connect_async(url.as_str()).await?;
        debug!(status = %resp.status(), "[FEED] websocket handshake complete");
        let (write, read) = ws_stream.split();
        Ok((Box::pin(write), read.boxed()))
    }
}
