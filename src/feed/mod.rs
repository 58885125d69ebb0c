//! Price feed WebSocket client.
//!
//! Responsibilities:
//! • Maintain one connection to a streaming price feed.
//! • Keep the latest decoded bitcoin price for subscribers.
//! • Detect silent connections with heartbeats and reconnect with backoff.

pub mod connection;
pub mod decoder;
pub mod heartbeat;
pub mod receiver;
pub mod session;
pub mod transport;

#[cfg(test)]
pub(crate) mod mock;

pub use connection::Connection;
pub use decoder::decode;
pub use session::{FailureReason, FeedSession};
pub use transport::{Transport, WsTransport};
