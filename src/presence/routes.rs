//! Presence query surface. JWT auth required; non-elevated principals may
//! only read their own tenant.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::auth::middleware::Claims;
use crate::presence::TenantRank;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct TenantCountResponse {
    pub tenant_id: String,
    pub online: u64,
}

/// GET /api/presence/tenants/{tenant}/count — authoritative live count.
pub async fn tenant_count(
    State(state): State<AppState>,
    claims: Claims,
    Path(tenant_id): Path<String>,
) -> Result<Json<TenantCountResponse>, StatusCode> {
    if !claims.can_access_tenant(&tenant_id) {
        return Err(StatusCode::FORBIDDEN);
    }
    let online = state.registry.tenant_count(&tenant_id).await;
    Ok(Json(TenantCountResponse { tenant_id, online }))
}

#[derive(Debug, Serialize)]
pub struct TenantUsersResponse {
    pub tenant_id: String,
    pub users: Vec<String>,
}

/// GET /api/presence/tenants/{tenant}/users — distinct online users.
pub async fn tenant_users(
    State(state): State<AppState>,
    claims: Claims,
    Path(tenant_id): Path<String>,
) -> Result<Json<TenantUsersResponse>, StatusCode> {
    if !claims.can_access_tenant(&tenant_id) {
        return Err(StatusCode::FORBIDDEN);
    }
    let users = state.registry.tenant_users(&tenant_id).await;
    Ok(Json(TenantUsersResponse { tenant_id, users }))
}

#[derive(Debug, Serialize)]
pub struct UserOnlineResponse {
    pub tenant_id: String,
    pub user_id: String,
    pub online: bool,
}

/// GET /api/presence/tenants/{tenant}/users/{user} — online check.
pub async fn user_online(
    State(state): State<AppState>,
    claims: Claims,
    Path((tenant_id, user_id)): Path<(String, String)>,
) -> Result<Json<UserOnlineResponse>, StatusCode> {
    if !claims.can_access_tenant(&tenant_id) {
        return Err(StatusCode::FORBIDDEN);
    }
    let online = state.registry.is_user_online(&user_id, &tenant_id).await;
    Ok(Json(UserOnlineResponse {
        tenant_id,
        user_id,
        online,
    }))
}

#[derive(Debug, Deserialize)]
pub struct GlobalQuery {
    #[serde(default = "default_ranking_limit")]
    pub limit: usize,
}

fn default_ranking_limit() -> usize {
    10
}

#[derive(Debug, Serialize)]
pub struct GlobalPresenceResponse {
    /// Sum of live per-tenant counts — authoritative, not the ranking cache.
    pub global: u64,
    /// Top tenants from the ranking cache. Best-effort, eventually
    /// consistent with the live counts.
    pub tenants: Vec<TenantRank>,
    pub degraded: bool,
}

/// GET /api/presence/global?limit=N — elevated principals only.
pub async fn global_presence(
    State(state): State<AppState>,
    claims: Claims,
    Query(query): Query<GlobalQuery>,
) -> Result<Json<GlobalPresenceResponse>, StatusCode> {
    if !claims.elevated {
        return Err(StatusCode::FORBIDDEN);
    }
    let health = state.registry.health().await;
    let global = state.registry.global_count().await;
    let tenants = state.registry.ranking(query.limit).await;
    Ok(Json(GlobalPresenceResponse {
        global,
        tenants,
        degraded: health.degraded,
    }))
}
