use anyhow::Result;
use coin_feed::{config::FeedConfig, feed::FeedSession, utils};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    utils::init_logging();

    let config = FeedConfig::from_env()?;
    tracing::info!(
        url = %config.feed_url,
        heartbeat_secs = config.heartbeat_interval.as_secs(),
        ping_threshold = config.ping_threshold,
        "[INIT] coin-feed starting"
    );

    let session = FeedSession::connect(config);
    let mut updates = session.subscribe();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = updates.borrow_and_update().clone();
                match (state.latest_price(), state.latest_value.as_deref()) {
                    (Some(price), _) => tracing::info!(
                        %price,
                        connected = state.is_connected,
                        "[PRICE] Bitcoin Price(USD)"
                    ),
                    (None, Some(raw)) => tracing::warn!(raw, "[PRICE] quote is not a decimal"),
                    (None, None) => tracing::info!(connected = state.is_connected, "[PRICE] waiting for first quote"),
                }
            }
            res = &mut shutdown => {
                if let Err(e) = res {
                    tracing::warn!(error = %e, "[INIT] failed to listen for ctrl-c");
                }
                break;
            }
        }
    }

    tracing::info!("[INIT] shutting down");
    session.shutdown().await;
    Ok(())
}
