//! Operator surface: force-disconnect.

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};

use crate::auth::middleware::Claims;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct DisconnectRequest {
    pub user_id: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DisconnectResponse {
    pub user_id: String,
    /// Connections signalled on this instance. Other instances drop their
    /// own connections when the platform revokes the session.
    pub disconnected: usize,
}

/// POST /api/connections/disconnect — elevated only. Terminates every local
/// connection of the target user; each connection's actor runs its normal
/// cleanup path (room leave, unregister, presence delta), so accounting
/// stays exact.
pub async fn disconnect_user(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<DisconnectRequest>,
) -> Result<Json<DisconnectResponse>, StatusCode> {
    if !claims.elevated {
        return Err(StatusCode::FORBIDDEN);
    }

    let reason = body.reason.as_deref().unwrap_or("disconnected by operator");
    let disconnected = state.rooms.force_close_user(&body.user_id, reason);

    tracing::info!(
        user_id = %body.user_id,
        by = %claims.sub,
        disconnected,
        "operator force-disconnect"
    );
    Ok(Json(DisconnectResponse {
        user_id: body.user_id,
        disconnected,
    }))
}
