use super::connection::Connection;
use super::decoder;
use super::session::{EpochWatch, EventSender, FailureReason, SessionEvent};
use std::sync::Arc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, trace, warn};

/// Read frames from `conn` until it errors, closes, or stops being current.
///
/// Values are handed to the session tagged with this connection's epoch; the
/// session drops them if a newer connection has been installed meanwhile.
pub async fn run(conn: Arc<Connection>, epochs: EpochWatch, events: EventSender) {
    let epoch = conn.epoch();

    loop {
        if !epochs.is_current(epoch) {
            debug!(%epoch, "[FEED] receive loop superseded");
            return;
        }

        match conn.receive_one().await {
            Ok(Message::Pong(payload)) => {
                if conn.is_own_pong(&payload) {
                    trace!(%epoch, "[HEARTBEAT] pong");
                    conn.pings().reset();
                } else {
                    trace!(%epoch, len = payload.len(), "[HEARTBEAT] ignoring untagged pong");
                }
            }
            Ok(Message::Close(frame)) => {
                info!(%epoch, ?frame, "[FEED] connection closed by server");
                events.send(SessionEvent::Closed { epoch });
                return;
            }
            Ok(frame) => {
                let Some(value) = decoder::decode(&frame) else {
                    continue;
                };
                if !epochs.is_current(epoch) {
                    debug!(%epoch, "[FEED] dropping value from superseded connection");
                    return;
                }
                events.send(SessionEvent::Published { epoch, value });
            }
            Err(e) => {
                if conn.state().is_terminal() {
                    debug!(%epoch, error = %e, "[FEED] receive stopped on local close");
                } else {
                    warn!(%epoch, error = %e, "[FEED] websocket receive error");
                }
                events.send(SessionEvent::Failed {
                    epoch,
                    reason: FailureReason::Receive(e.to_string()),
                });
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::mock::{MockPeer, MockTransport};
    use crate::models::Epoch;
    use tokio::sync::{mpsc, watch};
    use url::Url;

    struct Harness {
        conn: Arc<Connection>,
        peer: MockPeer,
        epoch_tx: watch::Sender<Epoch>,
        events: mpsc::UnboundedReceiver<SessionEvent>,
        task: tokio::task::JoinHandle<()>,
        _tx: mpsc::UnboundedSender<SessionEvent>,
    }

    async fn harness() -> Harness {
        let (transport, mut peers) = MockTransport::new();
        let conn = Arc::new(Connection::new(Epoch(1), 2));
        let url = Url::parse("ws://feed.test/prices").unwrap();
        conn.open(&transport, &url).await.unwrap();
        let peer = peers.recv().await.unwrap();

        let (epoch_tx, epoch_rx) = watch::channel(Epoch(1));
        let (tx, events) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(
            conn.clone(),
            EpochWatch::new(epoch_rx),
            EventSender::new(&tx),
        ));
        Harness {
            conn,
            peer,
            epoch_tx,
            events,
            task,
            _tx: tx,
        }
    }

    #[tokio::test]
    async fn decoded_values_are_published_in_order() {
        let mut h = harness().await;
        h.peer.push_text(r#"{"bitcoin":"50000.00}"#);
        h.peer.push_text(r#"{"bitcoin":"50000.01"}"#);
        h.peer.push(Message::Binary(br#"{"bitcoin":"50000.02"}"#.to_vec()));

        for expected in ["50000.01", "50000.02"] {
            match h.events.recv().await {
                Some(SessionEvent::Published { epoch, value }) => {
                    assert_eq!(epoch, Epoch(1));
                    assert_eq!(value, expected);
                }
                other => panic!("unexpected event {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn tagged_pong_resets_ping_counter() {
        let mut h = harness().await;
        h.conn.pings().advance();
        h.conn.pings().advance();

        h.peer.push(Message::Pong(b"someone else".to_vec()));
        h.peer.push(Message::Pong(Epoch(1).tag().to_vec()));
        // barrier: the value is published after both pongs were handled
        h.peer.push_text(r#"{"bitcoin":"1"}"#);
        assert!(matches!(
            h.events.recv().await,
            Some(SessionEvent::Published { .. })
        ));
        assert_eq!(h.conn.pings().count(), 0);
    }

    #[tokio::test]
    async fn transport_error_reports_failure_and_stops() {
        let mut h = harness().await;
        h.peer.fail();

        match h.events.recv().await {
            Some(SessionEvent::Failed { epoch, reason }) => {
                assert_eq!(epoch, Epoch(1));
                assert!(matches!(reason, FailureReason::Receive(_)));
            }
            other => panic!("unexpected event {other:?}"),
        }
        h.task.await.unwrap();
    }

    #[tokio::test]
    async fn close_frame_reports_closed() {
        let mut h = harness().await;
        h.peer.push(Message::Close(None));

        assert!(matches!(
            h.events.recv().await,
            Some(SessionEvent::Closed { epoch: Epoch(1) })
        ));
        h.task.await.unwrap();
    }

    #[tokio::test]
    async fn superseded_loop_stops_before_next_receive() {
        let mut h = harness().await;
        h.peer.push_text(r#"{"bitcoin":"1"}"#);
        assert!(matches!(
            h.events.recv().await,
            Some(SessionEvent::Published { .. })
        ));

        h.epoch_tx.send_replace(Epoch(2));
        h.peer.push_text(r#"{"bitcoin":"2"}"#);
        h.task.await.unwrap();
        assert!(h.events.try_recv().is_err());
    }
}
