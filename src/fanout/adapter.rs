//! Distribution adapter: store pub/sub -> local rooms.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::events::{DomainEvent, PresenceUpdate};
use crate::fanout::recent::RecentEvents;
use crate::store::{keys, CoordinationStore, StoreMessage};
use crate::ws::protocol::ServerMessage;
use crate::ws::rooms::{RoomId, RoomRegistry};

/// Subscribe to the event and presence channels and route every message to
/// the local rooms it belongs to. Runs until cancelled; the store backend
/// keeps the underlying subscription alive across reconnects.
pub async fn run_adapter(
    store: Arc<dyn CoordinationStore>,
    rooms: Arc<RoomRegistry>,
    recent: Arc<RecentEvents>,
    cancel: CancellationToken,
) {
    let patterns = vec![
        keys::TENANT_EVENT_PATTERN.to_string(),
        keys::GLOBAL_EVENT_CHANNEL.to_string(),
        keys::PRESENCE_CHANNEL.to_string(),
    ];
    let mut rx = match store.subscribe(&patterns).await {
        Ok(rx) => rx,
        Err(err) => {
            tracing::error!(error = %err, "distribution adapter could not subscribe");
            return;
        }
    };

    tracing::info!("distribution adapter running");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("distribution adapter stopped");
                return;
            }
            msg = rx.recv() => {
                let Some(msg) = msg else {
                    tracing::warn!("distribution subscription ended");
                    return;
                };
                route_message(&msg, &rooms, &recent);
            }
        }
    }
}

/// Re-emit one pub/sub message to the matching local room. Received messages
/// are never published back to the store.
fn route_message(msg: &StoreMessage, rooms: &RoomRegistry, recent: &RecentEvents) {
    if msg.channel == keys::PRESENCE_CHANNEL {
        let update: PresenceUpdate = match serde_json::from_slice(&msg.payload) {
            Ok(update) => update,
            Err(err) => {
                tracing::warn!(error = %err, "undecodable presence delta");
                return;
            }
        };
        let room = RoomId::Tenant(update.tenant_id.clone());
        rooms.broadcast(&room, &ServerMessage::Presence { update });
        return;
    }

    let event: DomainEvent = match serde_json::from_slice(&msg.payload) {
        Ok(event) => event,
        Err(err) => {
            tracing::warn!(channel = %msg.channel, error = %err, "undecodable event envelope");
            return;
        }
    };

    if msg.channel == keys::GLOBAL_EVENT_CHANNEL {
        rooms.broadcast(&RoomId::Global, &ServerMessage::Event { event });
    } else if let Some(tenant_id) = keys::tenant_of_event_channel(&msg.channel) {
        recent.push(tenant_id, event.clone());
        rooms.broadcast(
            &RoomId::Tenant(tenant_id.to_string()),
            &ServerMessage::Event { event },
        );
    } else {
        tracing::warn!(channel = %msg.channel, "message on unexpected channel");
    }
}
