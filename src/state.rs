use std::sync::Arc;
use std::time::Duration;

use crate::auth::session::SessionValidator;
use crate::events::publisher::EventPublisher;
use crate::fanout::recent::RecentEvents;
use crate::limits::PublishRateLimiter;
use crate::presence::PresenceRegistry;
use crate::ws::rooms::RoomRegistry;

/// Per-connection transport tuning, resolved from config at startup.
#[derive(Clone, Copy, Debug)]
pub struct GatewaySettings {
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
}

/// Shared application state passed to all handlers via axum State extractor.
/// Built once at startup and handed by reference to everything that needs it;
/// there is no ambient global lookup.
#[derive(Clone)]
pub struct AppState {
    /// JWT verification secret (256-bit random key)
    pub jwt_secret: Vec<u8>,
    /// Distributed presence accounting
    pub registry: Arc<PresenceRegistry>,
    /// Event fanout to the store's channels
    pub publisher: Arc<EventPublisher>,
    /// Local connections and their rooms
    pub rooms: Arc<RoomRegistry>,
    /// Most-recent-events cache for snapshots
    pub recent: Arc<RecentEvents>,
    /// Session revocation check, backed by the platform's session store
    pub sessions: Arc<dyn SessionValidator>,
    /// Per-IP limiter for the event injection endpoint
    pub limiter: Arc<PublishRateLimiter>,
    /// Transport heartbeat settings
    pub settings: GatewaySettings,
}
