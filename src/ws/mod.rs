pub mod actor;
pub mod handler;
pub mod protocol;
pub mod rooms;

use tokio::sync::mpsc;

/// Sender half of a connection's outbound channel. Any part of the system
/// can clone this to push messages to a specific client.
pub type ConnectionSender = mpsc::UnboundedSender<axum::extract::ws::Message>;
