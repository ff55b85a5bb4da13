//! Administrative event injection.

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::auth::middleware::Claims;
use crate::error::PublishError;
use crate::events::{ActorMeta, DomainEvent};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct PublishRequest {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub payload: Value,
    /// Elevated callers may publish on behalf of another tenant; everyone
    /// else is pinned to their own.
    #[serde(default)]
    pub tenant_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PublishResponse {
    pub event: DomainEvent,
}

#[derive(Debug, Serialize)]
pub struct PublishErrorResponse {
    pub error: String,
}

/// POST /api/events — publish a domain event on behalf of the caller's
/// tenant. Same type enumeration and scoping rules as internal publishers;
/// malformed payloads are rejected with a validation error.
pub async fn publish_event(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    claims: Claims,
    Json(body): Json<PublishRequest>,
) -> Result<(StatusCode, Json<PublishResponse>), (StatusCode, Json<PublishErrorResponse>)> {
    if !state.limiter.check(addr.ip()) {
        return Err(reject(StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded"));
    }

    let tenant_id = match body.tenant_id {
        Some(tenant) if claims.elevated => tenant,
        Some(tenant) if tenant != claims.tenant_id => {
            return Err(reject(
                StatusCode::FORBIDDEN,
                "cannot publish for another tenant",
            ));
        }
        _ => claims.tenant_id.clone(),
    };

    let actor = ActorMeta {
        user_id: claims.sub.clone(),
        session_id: None,
        source: Some("api".to_string()),
    };

    match state
        .publisher
        .publish_raw(&tenant_id, &body.event_type, body.payload, Some(actor))
        .await
    {
        Ok(event) => Ok((StatusCode::ACCEPTED, Json(PublishResponse { event }))),
        Err(err @ PublishError::UnknownType(_)) => {
            Err(reject(StatusCode::UNPROCESSABLE_ENTITY, &err.to_string()))
        }
        Err(err @ PublishError::InvalidPayload { .. }) => {
            Err(reject(StatusCode::UNPROCESSABLE_ENTITY, &err.to_string()))
        }
        Err(PublishError::Store(err)) => {
            tracing::warn!(error = %err, "event injection failed at the store");
            Err(reject(
                StatusCode::SERVICE_UNAVAILABLE,
                "event distribution unavailable",
            ))
        }
    }
}

fn reject(status: StatusCode, message: &str) -> (StatusCode, Json<PublishErrorResponse>) {
    (
        status,
        Json(PublishErrorResponse {
            error: message.to_string(),
        }),
    )
}
