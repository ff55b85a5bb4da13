use axum::{middleware, Json, Router};

use crate::admin;
use crate::auth::middleware::JwtSecret;
use crate::events::routes as event_routes;
use crate::presence::routes as presence_routes;
use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// Inject the JWT secret into request extensions so the Claims extractor can
/// find it.
async fn inject_jwt_secret(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> axum::response::Response {
    req.extensions_mut()
        .insert(JwtSecret(state.jwt_secret.clone()));
    next.run(req).await
}

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    // Presence query surface (JWT required — Claims extractor validates)
    let presence_api = Router::new()
        .route(
            "/api/presence/tenants/{tenant}/count",
            axum::routing::get(presence_routes::tenant_count),
        )
        .route(
            "/api/presence/tenants/{tenant}/users",
            axum::routing::get(presence_routes::tenant_users),
        )
        .route(
            "/api/presence/tenants/{tenant}/users/{user}",
            axum::routing::get(presence_routes::user_online),
        )
        .route(
            "/api/presence/global",
            axum::routing::get(presence_routes::global_presence),
        );

    // Administrative surface
    let admin_api = Router::new()
        .route(
            "/api/events",
            axum::routing::post(event_routes::publish_event),
        )
        .route(
            "/api/connections/disconnect",
            axum::routing::post(admin::disconnect_user),
        );

    // WebSocket endpoint (auth via query param, not JWT header)
    let ws_routes = Router::new().route("/ws", axum::routing::get(ws_handler::ws_upgrade));

    // Health check (public)
    let health = Router::new().route("/health", axum::routing::get(health_check));

    Router::new()
        .merge(presence_api)
        .merge(admin_api)
        .merge(ws_routes)
        .merge(health)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            inject_jwt_secret,
        ))
        .with_state(state)
}

/// GET /health — liveness plus degraded-mode visibility. During a store
/// outage clients stay connected and see local-instance data; this is where
/// that state is surfaced instead of hidden.
async fn health_check(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Json<crate::presence::HealthReport> {
    Json(state.registry.health().await)
}
