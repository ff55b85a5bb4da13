//! Periodic global stats broadcast for elevated subscribers.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::presence::PresenceRegistry;
use crate::ws::protocol::ServerMessage;
use crate::ws::rooms::{RoomId, RoomRegistry};

/// Recompute global count and ranking on a fixed interval and emit them to
/// local members of the global room. Independent of connection handling: a
/// slow or failed iteration logs and waits for the next tick.
pub async fn run_stats_loop(
    registry: Arc<PresenceRegistry>,
    rooms: Arc<RoomRegistry>,
    interval: Duration,
    ranking_limit: usize,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("stats loop stopped");
                return;
            }
            _ = ticker.tick() => {
                if rooms.room_size(&RoomId::Global) == 0 {
                    continue;
                }
                let health = registry.health().await;
                let global = registry.global_count().await;
                let tenants = registry.ranking(ranking_limit).await;
                rooms.broadcast(
                    &RoomId::Global,
                    &ServerMessage::Stats {
                        global,
                        tenants,
                        degraded: health.degraded,
                    },
                );
            }
        }
    }
}
