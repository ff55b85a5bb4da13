//! Local room bookkeeping.
//!
//! Rooms group this instance's connections for broadcast; the cluster-wide
//! meaning of a room comes from channel naming on the shared store, not from
//! any shared membership table. A connection joins its tenant room at connect
//! time and, when its principal has elevated scope, the global room.

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message};
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use super::protocol::ServerMessage;
use super::ConnectionSender;

/// Close code sent on operator force-disconnect.
pub const CLOSE_FORCED: u16 = 4008;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RoomId {
    Tenant(String),
    Global,
}

/// One live, authenticated connection owned by this instance.
pub struct LocalConnection {
    pub connection_id: String,
    pub user_id: String,
    pub tenant_id: String,
    pub elevated: bool,
    pub connected_at: DateTime<Utc>,
    sender: ConnectionSender,
}

impl LocalConnection {
    pub fn new(
        connection_id: String,
        user_id: String,
        tenant_id: String,
        elevated: bool,
        sender: ConnectionSender,
    ) -> Self {
        Self {
            connection_id,
            user_id,
            tenant_id,
            elevated,
            connected_at: Utc::now(),
            sender,
        }
    }

    /// Rooms this connection belongs to.
    fn rooms(&self) -> Vec<RoomId> {
        let mut rooms = vec![RoomId::Tenant(self.tenant_id.clone())];
        if self.elevated {
            rooms.push(RoomId::Global);
        }
        rooms
    }

    pub fn send(&self, message: Message) {
        // A closed channel means the writer task already died; the actor's
        // cleanup path handles the rest.
        let _ = self.sender.send(message);
    }
}

/// All local connections plus the room index over them.
pub struct RoomRegistry {
    connections: DashMap<String, Arc<LocalConnection>>,
    rooms: DashMap<RoomId, Vec<String>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            rooms: DashMap::new(),
        }
    }

    /// Register a connection and join its rooms.
    pub fn join(&self, connection: LocalConnection) -> Arc<LocalConnection> {
        let connection = Arc::new(connection);
        for room in connection.rooms() {
            self.rooms
                .entry(room)
                .or_default()
                .push(connection.connection_id.clone());
        }
        self.connections
            .insert(connection.connection_id.clone(), connection.clone());
        connection
    }

    /// Remove a connection from its rooms and the connection table.
    /// Idempotent: a second call for the same id is a no-op.
    pub fn leave(&self, connection_id: &str) -> Option<Arc<LocalConnection>> {
        let (_, connection) = self.connections.remove(connection_id)?;
        for room in connection.rooms() {
            let mut empty = false;
            if let Some(mut members) = self.rooms.get_mut(&room) {
                members.retain(|id| id != connection_id);
                empty = members.is_empty();
            }
            if empty {
                self.rooms.remove_if(&room, |_, members| members.is_empty());
            }
        }
        Some(connection)
    }

    /// Broadcast a message to every member of a room. The message is
    /// serialized once.
    pub fn broadcast(&self, room: &RoomId, message: &ServerMessage) {
        let Some(encoded) = message.encode() else {
            return;
        };
        let Some(members) = self.rooms.get(room) else {
            return;
        };
        for connection_id in members.iter() {
            if let Some(connection) = self.connections.get(connection_id) {
                connection.send(encoded.clone());
            }
        }
    }

    /// Force-close every connection of a user on this instance (operator
    /// disconnect). Returns the number of connections signalled.
    pub fn force_close_user(&self, user_id: &str, reason: &str) -> usize {
        let mut closed = 0;
        for entry in self.connections.iter() {
            if entry.user_id == user_id {
                entry.send(Message::Close(Some(CloseFrame {
                    code: CLOSE_FORCED,
                    reason: reason.to_string().into(),
                })));
                closed += 1;
            }
        }
        closed
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn room_size(&self, room: &RoomId) -> usize {
        self.rooms.get(room).map(|members| members.len()).unwrap_or(0)
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}
