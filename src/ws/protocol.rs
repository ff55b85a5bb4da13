//! Gateway wire protocol: JSON envelopes tagged by `op`.

use std::sync::Arc;

use axum::extract::ws::Message;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::PublishError;
use crate::events::{ActorMeta, DomainEvent, PresenceUpdate};
use crate::presence::TenantRank;
use crate::state::AppState;
use crate::ws::rooms::LocalConnection;

/// Commands a client may send after joining.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ClientCommand {
    /// Request the current presence snapshot plus recent events — for
    /// clients that just (re)connected and need state before the next delta.
    Snapshot,
    /// Inject a domain event on behalf of the caller's tenant. Subject to
    /// the closed type enumeration and the same payload validation as
    /// internal publishers.
    Publish {
        #[serde(rename = "type")]
        event_type: String,
        #[serde(default)]
        payload: Value,
    },
}

/// Messages the server pushes to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ServerMessage {
    Welcome {
        connection_id: String,
        tenant_id: String,
        online: u64,
    },
    Event {
        event: DomainEvent,
    },
    Presence {
        #[serde(flatten)]
        update: PresenceUpdate,
    },
    Snapshot {
        tenant_id: String,
        online: u64,
        users: Vec<String>,
        recent: Vec<DomainEvent>,
    },
    Stats {
        global: u64,
        tenants: Vec<TenantRank>,
        degraded: bool,
    },
    Error {
        code: u16,
        message: String,
    },
}

impl ServerMessage {
    /// Serialize to a WebSocket text frame. Serialization of our own types
    /// only fails on a bug; log it rather than killing the connection.
    pub fn encode(&self) -> Option<Message> {
        match serde_json::to_string(self) {
            Ok(text) => Some(Message::Text(text.into())),
            Err(err) => {
                tracing::error!(error = %err, "failed to encode server message");
                None
            }
        }
    }
}

/// Handle one inbound text frame: decode, dispatch, reply. A malformed or
/// failed command answers with an `error` frame and affects nothing else.
pub async fn handle_text_message(text: &str, conn: &Arc<LocalConnection>, state: &AppState) {
    let command = match serde_json::from_str::<ClientCommand>(text) {
        Ok(command) => command,
        Err(err) => {
            tracing::debug!(
                connection_id = %conn.connection_id,
                error = %err,
                "undecodable client command"
            );
            send(conn, &error_message(400, "malformed command"));
            return;
        }
    };

    match command {
        ClientCommand::Snapshot => handle_snapshot(conn, state).await,
        ClientCommand::Publish {
            event_type,
            payload,
        } => handle_publish(conn, state, &event_type, payload).await,
    }
}

async fn handle_snapshot(conn: &Arc<LocalConnection>, state: &AppState) {
    let online = state.registry.tenant_count(&conn.tenant_id).await;
    let users = state.registry.tenant_users(&conn.tenant_id).await;
    let recent = state.recent.for_tenant(&conn.tenant_id);
    send(
        conn,
        &ServerMessage::Snapshot {
            tenant_id: conn.tenant_id.clone(),
            online,
            users,
            recent,
        },
    );
}

async fn handle_publish(
    conn: &Arc<LocalConnection>,
    state: &AppState,
    event_type: &str,
    payload: Value,
) {
    let actor = ActorMeta {
        user_id: conn.user_id.clone(),
        session_id: Some(conn.connection_id.clone()),
        source: Some("gateway".to_string()),
    };
    match state
        .publisher
        .publish_raw(&conn.tenant_id, event_type, payload, Some(actor))
        .await
    {
        Ok(_) => {}
        Err(PublishError::UnknownType(raw)) => {
            send(conn, &error_message(422, &format!("unknown event type: {raw}")));
        }
        Err(PublishError::InvalidPayload { reason, .. }) => {
            send(conn, &error_message(422, &format!("invalid payload: {reason}")));
        }
        Err(PublishError::Store(err)) => {
            // Advisory: the event is lost but the connection lives on.
            tracing::warn!(
                connection_id = %conn.connection_id,
                error = %err,
                "client publish failed at the store"
            );
            send(conn, &error_message(503, "event distribution unavailable"));
        }
    }
}

fn error_message(code: u16, message: &str) -> ServerMessage {
    ServerMessage::Error {
        code,
        message: message.to_string(),
    }
}

fn send(conn: &Arc<LocalConnection>, message: &ServerMessage) {
    if let Some(encoded) = message.encode() {
        conn.send(encoded);
    }
}
