use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use pulse_gateway::auth;
use pulse_gateway::auth::session::{AllowAllSessions, SessionValidator};
use pulse_gateway::config::{generate_config_template, Config};
use pulse_gateway::error::StoreError;
use pulse_gateway::events::publisher::EventPublisher;
use pulse_gateway::fanout;
use pulse_gateway::fanout::recent::RecentEvents;
use pulse_gateway::limits::PublishRateLimiter;
use pulse_gateway::presence::{tasks, PresenceRegistry};
use pulse_gateway::routes;
use pulse_gateway::state::{AppState, GatewaySettings};
use pulse_gateway::store::memory::MemoryStore;
use pulse_gateway::store::redis::RedisStore;
use pulse_gateway::store::{CoordinationStore, StoreHealth};
use pulse_gateway::ws::rooms::RoomRegistry;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    // Initialize tracing/logging
    if config.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "pulse_gateway=info".parse().unwrap()),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "pulse_gateway=info".parse().unwrap()),
            )
            .init();
    }

    tracing::info!("Pulse gateway v{} starting", env!("CARGO_PKG_VERSION"));

    std::fs::create_dir_all(&config.data_dir)?;
    let jwt_secret = auth::jwt::load_or_generate_jwt_secret(&config.data_dir)?;

    let store_cfg = config.store_config();
    let gateway_cfg = config.gateway_config();

    // Connect the coordination store. A failed connect after bounded retries
    // commits the instance to single-instance (degraded) mode instead of
    // blocking startup.
    let health = Arc::new(StoreHealth::new(true));
    let store: Arc<dyn CoordinationStore> = match &store_cfg.url {
        Some(url) => {
            match connect_store(url, store_cfg.connect_retries, health.clone()).await {
                Ok(store) => {
                    tracing::info!(url = %url, "coordination store connected");
                    Arc::new(store)
                }
                Err(err) => {
                    tracing::warn!(
                        url = %url,
                        error = %err,
                        "coordination store unavailable, starting in single-instance mode"
                    );
                    health.mark(true); // the in-memory store is always reachable
                    Arc::new(MemoryStore::new())
                }
            }
        }
        None => {
            tracing::info!("no coordination store configured, single-instance mode");
            Arc::new(MemoryStore::new())
        }
    };

    let presence_ttl = Duration::from_secs(store_cfg.presence_ttl_secs);
    let registry = Arc::new(PresenceRegistry::new(
        store.clone(),
        health.clone(),
        presence_ttl,
    ));
    let publisher = Arc::new(EventPublisher::new(store.clone()));
    let rooms = Arc::new(RoomRegistry::new());
    let recent = Arc::new(RecentEvents::new(gateway_cfg.recent_events));
    let sessions: Arc<dyn SessionValidator> = Arc::new(AllowAllSessions);
    let limiter = Arc::new(PublishRateLimiter::new(
        gateway_cfg.publish_limit,
        Duration::from_secs(gateway_cfg.publish_window_secs),
    ));

    // Background loops, each on a child token so shutdown stops them without
    // racing in-flight connection handling.
    let cancel = CancellationToken::new();
    tokio::spawn(fanout::adapter::run_adapter(
        store.clone(),
        rooms.clone(),
        recent.clone(),
        cancel.child_token(),
    ));
    tokio::spawn(fanout::stats::run_stats_loop(
        registry.clone(),
        rooms.clone(),
        Duration::from_secs(gateway_cfg.stats_interval_secs),
        gateway_cfg.ranking_limit,
        cancel.child_token(),
    ));
    tokio::spawn(tasks::run_refresh_loop(
        registry.clone(),
        cancel.child_token(),
    ));
    tokio::spawn(tasks::run_cleanup_loop(
        registry.clone(),
        Duration::from_secs(gateway_cfg.cleanup_interval_secs),
        cancel.child_token(),
    ));

    // Advisory platform-wide signal; losing it never fails startup.
    if let Err(err) = publisher
        .publish_system(
            "gateway",
            "started",
            Some(serde_json::json!({ "version": env!("CARGO_PKG_VERSION") })),
        )
        .await
    {
        tracing::warn!(error = %err, "startup event not published");
    }

    let app_state = AppState {
        jwt_secret,
        registry,
        publisher,
        rooms,
        recent,
        sessions,
        limiter,
        settings: GatewaySettings {
            ping_interval: Duration::from_secs(gateway_cfg.ping_interval_secs),
            pong_timeout: Duration::from_secs(gateway_cfg.pong_timeout_secs),
        },
    };

    let app = routes::build_router(app_state);

    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(cancel))
    .await?;

    Ok(())
}

/// Bounded exponential backoff around the initial store connect.
async fn connect_store(
    url: &str,
    retries: usize,
    health: Arc<StoreHealth>,
) -> Result<RedisStore, StoreError> {
    let connect = || RedisStore::connect(url, health.clone());
    connect
        .retry(
            ExponentialBuilder::default()
                .with_min_delay(Duration::from_millis(500))
                .with_max_delay(Duration::from_secs(5))
                .with_max_times(retries)
                .with_jitter(),
        )
        .notify(|err: &StoreError, delay: Duration| {
            tracing::warn!(error = %err, retry_in = ?delay, "store connect failed");
        })
        .await
}

async fn shutdown_signal(cancel: CancellationToken) {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received, stopping background tasks");
    cancel.cancel();
}
