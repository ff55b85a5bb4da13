//! JWT claims and the axum extractor for authenticated routes.

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
};
use serde::{Deserialize, Serialize};

/// JWT claims extracted from the `Authorization: Bearer` header.
/// Implements axum's FromRequestParts for use as an extractor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User ID
    pub sub: String,
    /// Tenant the principal belongs to
    pub tenant_id: String,
    /// Role name within the tenant
    pub role: String,
    /// Whether the principal may see cross-tenant aggregates and the global
    /// event stream
    pub elevated: bool,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration (Unix timestamp)
    pub exp: i64,
}

impl Claims {
    /// Whether the principal may read the given tenant's presence data.
    pub fn can_access_tenant(&self, tenant_id: &str) -> bool {
        self.elevated || self.tenant_id == tenant_id
    }
}

/// JWT secret carried in request extensions (set by a middleware layer in
/// the router) so the extractor can verify without reaching into app state.
#[derive(Clone)]
pub struct JwtSecret(pub Vec<u8>);

impl<S> FromRequestParts<S> for Claims
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or(StatusCode::UNAUTHORIZED)?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or(StatusCode::UNAUTHORIZED)?;

        let jwt_secret = parts
            .extensions
            .get::<JwtSecret>()
            .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?;

        crate::auth::jwt::verify_access_token(&jwt_secret.0, token)
            .map_err(|_| StatusCode::UNAUTHORIZED)
    }
}
