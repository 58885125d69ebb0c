//! Shared data structures used throughout the application.

use bigdecimal::BigDecimal;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

/// Identifier of one connection instance. Strictly increasing per session;
/// `Epoch(0)` means no connection has been created yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Epoch(pub u64);

impl Epoch {
    pub fn next(self) -> Self {
        Epoch(self.0 + 1)
    }

    /// Payload carried by heartbeat pings so pongs can be matched to their connection.
    pub fn tag(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a single connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Opening,
    Open,
    Closing,
    Closed,
}

impl ConnectionState {
    /// Closing or closed; no further frames will be read.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Closing | ConnectionState::Closed)
    }
}

/// What subscribers observe.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub is_connected: bool,
    pub latest_value: Option<String>,
}

impl SessionState {
    /// Latest value as a decimal, if one was published and it is numeric.
    pub fn latest_price(&self) -> Option<BigDecimal> {
        BigDecimal::from_str(self.latest_value.as_deref()?).ok()
    }
}

/// The single field extracted from feed payloads.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DecodedMessage {
    #[serde(rename = "bitcoin")]
    pub bitcoin_price: String,
}
