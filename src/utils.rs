//! Miscellaneous helper utilities.

use std::time::Duration;
use tracing_subscriber::{EnvFilter, fmt};

/// Initialize `tracing` subscriber with env-based filter.
///
/// If `RUST_LOG` is not set, defaults to `info` level.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();
}

/// Exponential backoff for the `attempt`-th consecutive reconnect.
///
/// Attempt 0 is the initial connection and never waits.
pub fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }
    let factor = 1u32 << (attempt - 1).min(16);
    base.saturating_mul(factor).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_attempt_is_immediate() {
        let d = backoff_delay(0, Duration::from_secs(1), Duration::from_secs(30));
        assert_eq!(d, Duration::ZERO);
    }

    #[test]
    fn backoff_doubles_then_caps() {
        let base = Duration::from_millis(500);
        let max = Duration::from_secs(3);
        let delays: Vec<_> = (1..=5).map(|n| backoff_delay(n, base, max)).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(500),
                Duration::from_millis(1000),
                Duration::from_millis(2000),
                Duration::from_secs(3),
                Duration::from_secs(3),
            ]
        );
    }

    #[test]
    fn huge_attempt_counts_do_not_overflow() {
        let d = backoff_delay(u32::MAX, Duration::from_secs(1), Duration::from_secs(30));
        assert_eq!(d, Duration::from_secs(30));
    }
}
