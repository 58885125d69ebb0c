//! Application-level liveness probing.
//!
//! An open socket that has gone quiet looks exactly like a feed with nothing
//! new to report, so the monitor pings on a fixed interval and declares the
//! connection dead once `threshold` pings in a row go unanswered.

use super::connection::Connection;
use super::session::{EpochWatch, EventSender, FailureReason, SessionEvent};
use crate::models::ConnectionState;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};

/// Outcome of one heartbeat cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingDecision {
    /// Send another ping; carries the number now outstanding.
    Probe(u32),
    /// Threshold reached without a pong.
    Exhausted,
}

/// Unanswered pings for one connection. Always within `0..=threshold`.
#[derive(Debug)]
pub struct PingCounter {
    count: AtomicU32,
    threshold: u32,
}

impl PingCounter {
    pub fn new(threshold: u32) -> Self {
        Self {
            count: AtomicU32::new(0),
            threshold,
        }
    }

    pub fn count(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn advance(&self) -> PingDecision {
        let threshold = self.threshold;
        match self
            .count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < threshold).then_some(n + 1)
            }) {
            Ok(prev) => PingDecision::Probe(prev + 1),
            Err(_) => PingDecision::Exhausted,
        }
    }

    /// A pong arrived.
    pub fn reset(&self) {
        self.count.store(0, Ordering::SeqCst);
    }
}

/// Probe `conn` every `interval` until it is superseded, closed, or found dead.
pub async fn monitor(
    conn: Arc<Connection>,
    epochs: EpochWatch,
    events: EventSender,
    interval: Duration,
) {
    let epoch = conn.epoch();
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        if !epochs.is_current(epoch) || conn.state() != ConnectionState::Open {
            debug!(%epoch, state = ?conn.state(), "[HEARTBEAT] connection no longer current, stopping");
            return;
        }

        match conn.pings().advance() {
            PingDecision::Probe(outstanding) => {
                trace!(%epoch, outstanding, "[HEARTBEAT] ping");
                // a ping stuck behind a full socket counts as unanswered
                match tokio::time::timeout(interval, conn.ping()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(%epoch, error = %e, "[HEARTBEAT] ping send failed"),
                    Err(_) => warn!(%epoch, outstanding, "[HEARTBEAT] ping not written within interval"),
                }
            }
            PingDecision::Exhausted => {
                warn!(
                    %epoch,
                    unanswered = conn.pings().count(),
                    "[HEARTBEAT] no pong received, declaring connection dead"
                );
                events.send(SessionEvent::Failed {
                    epoch,
                    reason: FailureReason::HeartbeatTimeout,
                });
                return;
            }
        }
    }
}
