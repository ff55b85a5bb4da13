//! WebSocket upgrade and authentication.

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use serde::Deserialize;

use crate::auth::jwt;
use crate::state::AppState;
use crate::ws::actor;

/// Query parameters for WebSocket connection. Auth is via query param
/// `?token=JWT` — browsers cannot set headers on WebSocket upgrades.
#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    pub token: String,
}

/// WebSocket close codes:
/// 4001 = token expired
/// 4002 = token invalid
/// 4003 = session revoked
const CLOSE_TOKEN_EXPIRED: u16 = 4001;
const CLOSE_TOKEN_INVALID: u16 = 4002;
const CLOSE_SESSION_REVOKED: u16 = 4003;

/// GET /ws?token=JWT
/// Authenticates before any application data is trusted. On failure the
/// connection is rejected before any room join or presence registration: we
/// upgrade, send the close code, and never reach the actor.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsAuthQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let claims = match jwt::verify_access_token(&state.jwt_secret, &params.token) {
        Ok(claims) => claims,
        Err(err) => {
            let (close_code, reason) = match err.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    (CLOSE_TOKEN_EXPIRED, "Token expired")
                }
                _ => (CLOSE_TOKEN_INVALID, "Token invalid"),
            };
            tracing::warn!(close_code, reason, "WebSocket auth failed");
            return reject(ws, close_code, reason);
        }
    };

    // A cryptographically valid token can outlive its session; check with
    // the session store once, at connect time.
    if !state.sessions.is_session_active(&claims.sub).await {
        tracing::warn!(user_id = %claims.sub, "session revoked, rejecting connection");
        return reject(ws, CLOSE_SESSION_REVOKED, "Session revoked");
    }

    tracing::info!(
        user_id = %claims.sub,
        tenant_id = %claims.tenant_id,
        elevated = claims.elevated,
        "WebSocket connection authenticated"
    );
    ws.on_upgrade(move |socket| actor::run_connection(socket, state, claims))
}

/// Upgrade the connection, then immediately close it with the error code.
fn reject(ws: WebSocketUpgrade, close_code: u16, reason: &'static str) -> Response {
    ws.on_upgrade(move |mut socket| async move {
        let close_frame = CloseFrame {
            code: close_code,
            reason: reason.into(),
        };
        let _ = socket.send(Message::Close(Some(close_frame))).await;
    })
}
