use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Pulse real-time gateway
#[derive(Parser, Serialize, Deserialize, Clone, Debug)]
#[command(name = "pulse-gateway", version, about = "Pulse real-time presence and event gateway")]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "PULSE_PORT", default_value = "8420")]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "PULSE_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Path to TOML config file
    #[arg(long, default_value = "./pulse.toml")]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "PULSE_JSON_LOGS")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    pub generate_config: bool,

    /// Data directory for persistent state (JWT secret)
    #[arg(long, env = "PULSE_DATA_DIR", default_value = "./data")]
    pub data_dir: String,

    /// Coordination store URL (overrides [store] url from the TOML file).
    /// When unset entirely, the gateway runs single-instance on the
    /// in-memory store.
    #[arg(long, env = "PULSE_STORE_URL")]
    pub store_url: Option<String>,

    /// Coordination store configuration (loaded from [store] section in TOML)
    #[arg(skip)]
    #[serde(default)]
    pub store: Option<StoreConfig>,

    /// Gateway tuning (loaded from [gateway] section in TOML)
    #[arg(skip)]
    #[serde(default)]
    pub gateway: Option<GatewayConfig>,
}

/// Configuration for the shared coordination store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store URL, e.g. "redis://127.0.0.1:6379". None = in-memory,
    /// single-instance.
    #[serde(default)]
    pub url: Option<String>,

    /// TTL on tenant presence sets — bounds a crashed instance's stale
    /// presence to one window (default: 60)
    #[serde(default = "default_presence_ttl")]
    pub presence_ttl_secs: u64,

    /// Bounded connect attempts at startup before falling back to
    /// single-instance mode (default: 5)
    #[serde(default = "default_connect_retries")]
    pub connect_retries: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: None,
            presence_ttl_secs: 60,
            connect_retries: 5,
        }
    }
}

fn default_presence_ttl() -> u64 {
    60
}

fn default_connect_retries() -> usize {
    5
}

/// Gateway connection and broadcast tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Server ping interval in seconds (default: 30)
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,

    /// Close the connection when no pong arrives within this many seconds
    /// after a ping (default: 10)
    #[serde(default = "default_pong_timeout")]
    pub pong_timeout_secs: u64,

    /// Interval between global stats broadcasts to elevated subscribers
    /// (default: 15)
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,

    /// Interval between orphaned-presence cleanup passes (default: 300)
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,

    /// Recent events kept per tenant for snapshots (default: 50)
    #[serde(default = "default_recent_events")]
    pub recent_events: usize,

    /// Tenants included in the stats broadcast ranking (default: 10)
    #[serde(default = "default_ranking_limit")]
    pub ranking_limit: usize,

    /// Event injections allowed per IP per window (default: 60)
    #[serde(default = "default_publish_limit")]
    pub publish_limit: u32,

    /// Rate-limit window in seconds (default: 60)
    #[serde(default = "default_publish_window")]
    pub publish_window_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            ping_interval_secs: 30,
            pong_timeout_secs: 10,
            stats_interval_secs: 15,
            cleanup_interval_secs: 300,
            recent_events: 50,
            ranking_limit: 10,
            publish_limit: 60,
            publish_window_secs: 60,
        }
    }
}

fn default_ping_interval() -> u64 {
    30
}

fn default_pong_timeout() -> u64 {
    10
}

fn default_stats_interval() -> u64 {
    15
}

fn default_cleanup_interval() -> u64 {
    300
}

fn default_recent_events() -> usize {
    50
}

fn default_ranking_limit() -> usize {
    10
}

fn default_publish_limit() -> u32 {
    60
}

fn default_publish_window() -> u64 {
    60
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8420,
            bind_address: "0.0.0.0".to_string(),
            config: "./pulse.toml".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            store_url: None,
            store: Some(StoreConfig::default()),
            gateway: Some(GatewayConfig::default()),
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (PULSE_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        let cli = Config::parse();
        let config_path = cli.config.clone();

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("PULSE_"))
            .merge(Serialized::defaults(cli))
            .extract()
    }

    /// Store config with the top-level URL override applied.
    pub fn store_config(&self) -> StoreConfig {
        let mut store = self.store.clone().unwrap_or_default();
        if self.store_url.is_some() {
            store.url = self.store_url.clone();
        }
        store
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        self.gateway.clone().unwrap_or_default()
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Pulse Gateway Configuration
# Place this file at ./pulse.toml or specify with --config <path>
# All settings can be overridden via environment variables (PULSE_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 8420)
# port = 8420

# Bind address (default: 0.0.0.0 — all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for the JWT verification secret
# data_dir = "./data"

# ---- Coordination Store ----
# [store]

# Store URL. Leave unset to run single-instance on the in-memory store
# (no cross-instance presence or event visibility).
# url = "redis://127.0.0.1:6379"

# TTL on tenant presence sets, in seconds. Bounds how long a crashed
# instance's presence entries survive. (default: 60)
# presence_ttl_secs = 60

# Bounded connect attempts at startup before committing to degraded
# single-instance mode (default: 5)
# connect_retries = 5

# ---- Gateway Tuning ----
# [gateway]

# Server WebSocket ping interval in seconds (default: 30)
# ping_interval_secs = 30

# Pong wait before the connection is dropped (default: 10)
# pong_timeout_secs = 10

# Global stats broadcast interval for elevated subscribers (default: 15)
# stats_interval_secs = 15

# Orphaned-presence cleanup interval (default: 300)
# cleanup_interval_secs = 300

# Recent events kept per tenant for snapshot requests (default: 50)
# recent_events = 50

# Tenants included in the stats ranking (default: 10)
# ranking_limit = 10

# Event injection rate limit, per source IP (default: 60 per 60s)
# publish_limit = 60
# publish_window_secs = 60
"#
    .to_string()
}
