//! Periodic presence maintenance loops.
//!
//! Both loops run independently of connection handling: a slow or failed
//! iteration logs and waits for the next tick, and shutdown cancels the
//! token without racing in-flight connections.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::PresenceRegistry;

/// Re-assert locally-owned presence entries on a fraction of the TTL so live
/// connections never expire out of the store, and so entries written while
/// the store was unreachable reappear once it recovers.
pub async fn run_refresh_loop(registry: Arc<PresenceRegistry>, cancel: CancellationToken) {
    let period = (registry.presence_ttl() / 3).max(Duration::from_secs(1));
    let mut ticker = tokio::time::interval(period);
    ticker.tick().await; // immediate first tick

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("presence refresh loop stopped");
                return;
            }
            _ = ticker.tick() => {
                registry.refresh_local().await;
            }
        }
    }
}

/// Periodic orphan cleanup: reverse mappings whose tenant set expired are
/// removed, covering instances that crashed between registering presence and
/// unregistering it.
pub async fn run_cleanup_loop(
    registry: Arc<PresenceRegistry>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("orphan cleanup loop stopped");
                return;
            }
            _ = ticker.tick() => {
                let removed = registry.cleanup_orphans().await;
                if removed == 0 {
                    tracing::debug!("orphan cleanup: nothing to do");
                }
            }
        }
    }
}
