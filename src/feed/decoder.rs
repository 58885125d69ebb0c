use crate::models::DecodedMessage;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

/// Extract the bitcoin price from a data frame.
///
/// Text and binary frames go through the same JSON path; control frames and
/// anything that does not carry a string `bitcoin` field yield `None`.
pub fn decode(frame: &Message) -> Option<String> {
    match frame {
        Message::Text(txt) => decode_payload(txt.as_bytes()),
        Message::Binary(bytes) => decode_payload(bytes),
        _ => None,
    }
}

/// Parse raw UTF-8 JSON bytes into the price string.
pub fn decode_payload(bytes: &[u8]) -> Option<String> {
    match serde_json::from_slice::<DecodedMessage>(bytes) {
        Ok(msg) => Some(msg.bitcoin_price),
        Err(e) => {
            debug!(error = %e, len = bytes.len(), "[FEED] payload decode failed");
            None
        }
    }
}
