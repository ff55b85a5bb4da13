//! Session validation seam.
//!
//! A token can verify cryptographically while the session behind it was
//! explicitly revoked. The gateway checks with the platform's session store
//! once at connect time through this trait; the store itself lives outside
//! the core.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

#[async_trait]
pub trait SessionValidator: Send + Sync {
    async fn is_session_active(&self, user_id: &str) -> bool;
}

/// Used when no session backend is wired up: every verified token is
/// considered backed by a live session.
pub struct AllowAllSessions;

#[async_trait]
impl SessionValidator for AllowAllSessions {
    async fn is_session_active(&self, _user_id: &str) -> bool {
        true
    }
}

/// In-memory revocation set. Operators (and the test suite) revoke a user to
/// invalidate their still-unexpired tokens immediately.
#[derive(Default)]
pub struct RevocationList {
    revoked: DashMap<String, DateTime<Utc>>,
}

impl RevocationList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn revoke(&self, user_id: &str) {
        self.revoked.insert(user_id.to_string(), Utc::now());
    }

    pub fn restore(&self, user_id: &str) {
        self.revoked.remove(user_id);
    }
}

#[async_trait]
impl SessionValidator for RevocationList {
    async fn is_session_active(&self, user_id: &str) -> bool {
        !self.revoked.contains_key(user_id)
    }
}
