//! Access-token verification for gateway connections and API calls.
//!
//! Token *issuance* belongs to the platform's auth service; this module only
//! verifies. The issue function exists for operational tooling and the test
//! suite, signed with the same shared secret.

use std::path::Path;

use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;

use crate::auth::middleware::Claims;

/// Access-token lifetime issued by [`issue_access_token`].
const ACCESS_TOKEN_TTL_SECS: i64 = 900;

/// Load or generate the JWT verification secret (256-bit random).
/// Stored as raw bytes in `data_dir/jwt_secret` so every instance behind the
/// same data volume verifies the same tokens.
pub fn load_or_generate_jwt_secret(data_dir: &str) -> Result<Vec<u8>, std::io::Error> {
    let key_path = Path::new(data_dir).join("jwt_secret");

    if key_path.exists() {
        let key = std::fs::read(&key_path)?;
        if key.len() == 32 {
            tracing::info!("JWT secret loaded from {}", key_path.display());
            return Ok(key);
        }
        tracing::warn!("JWT secret file has wrong size ({}), regenerating", key.len());
    }

    let key: [u8; 32] = rand::rng().random();
    std::fs::write(&key_path, key)?;
    tracing::info!("JWT secret generated at {}", key_path.display());
    Ok(key.to_vec())
}

/// Issue an access token for a principal.
/// Claims: sub=user id, tenant_id, role, elevated, iat, exp.
pub fn issue_access_token(
    secret: &[u8],
    user_id: &str,
    tenant_id: &str,
    role: &str,
    elevated: bool,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now().timestamp();
    let claims = Claims {
        sub: user_id.to_string(),
        tenant_id: tenant_id.to_string(),
        role: role.to_string(),
        elevated,
        iat: now,
        exp: now + ACCESS_TOKEN_TTL_SECS,
    };

    encode(
        &Header::default(), // HS256
        &claims,
        &EncodingKey::from_secret(secret),
    )
}

/// Verify an access token and return its claims.
pub fn verify_access_token(
    secret: &[u8],
    token: &str,
) -> Result<Claims, jsonwebtoken::errors::Error> {
    let validation = Validation::new(jsonwebtoken::Algorithm::HS256);
    let token_data = decode::<Claims>(token, &DecodingKey::from_secret(secret), &validation)?;
    Ok(token_data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_verifies() {
        let secret = [7u8; 32];
        let token = issue_access_token(&secret, "u-1", "acme", "member", false).unwrap();
        let claims = verify_access_token(&secret, &token).unwrap();
        assert_eq!(claims.sub, "u-1");
        assert_eq!(claims.tenant_id, "acme");
        assert!(!claims.elevated);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = issue_access_token(&[7u8; 32], "u-1", "acme", "member", false).unwrap();
        assert!(verify_access_token(&[8u8; 32], &token).is_err());
    }
}
