//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use domain::EngineConfig;
use hub::{HubConfig, SessionConfig};

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`, `PORT`: bind address (default `0.0.0.0:3000`)
/// - `RUST_LOG`: tracing filter directive (default `info`)
/// - `LOG_FORMAT`: `text` or `json` (default `text`)
/// - `DATABASE_URL`: PostgreSQL URL; the in-memory ledger is used when unset
/// - `DB_MAX_CONNECTIONS`: pool size (default `25`)
/// - `LOCK_TIMEOUT_MS`: row-lock wait bound (default `5000`)
/// - `STORE_TIMEOUT_MS`: lock-acquisition and statement bound (default `10000`)
/// - `CLIENT_QUEUE_CAPACITY`: per-session outbound queue (default `256`)
/// - `HUB_QUEUE_CAPACITY`: hub input queues (default `1024`)
/// - `PING_INTERVAL_SECS`, `PONG_WAIT_SECS`, `WRITE_WAIT_SECS`: keepalive
///   timings (default `54`, `60`, `10`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub lock_timeout: Duration,
    pub store_timeout: Duration,
    pub client_queue_capacity: usize,
    pub hub_queue_capacity: usize,
    pub ping_interval: Duration,
    pub pong_wait: Duration,
    pub write_wait: Duration,
}

/// Parses an environment variable, falling back to `default` when it is
/// unset or malformed.
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "ignoring malformed environment variable");
            default
        }),
        Err(_) => default,
    }
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: env_or("HOST", defaults.host),
            port: env_or("PORT", defaults.port),
            log_level: env_or("RUST_LOG", defaults.log_level),
            log_format: env_or("LOG_FORMAT", defaults.log_format),
            database_url: std::env::var("DATABASE_URL")
                .ok()
                .filter(|url| !url.is_empty()),
            db_max_connections: env_or("DB_MAX_CONNECTIONS", defaults.db_max_connections),
            lock_timeout: Duration::from_millis(env_or("LOCK_TIMEOUT_MS", 5000)),
            store_timeout: Duration::from_millis(env_or("STORE_TIMEOUT_MS", 10_000)),
            client_queue_capacity: env_or("CLIENT_QUEUE_CAPACITY", defaults.client_queue_capacity),
            hub_queue_capacity: env_or("HUB_QUEUE_CAPACITY", defaults.hub_queue_capacity),
            ping_interval: Duration::from_secs(env_or("PING_INTERVAL_SECS", 54)),
            pong_wait: Duration::from_secs(env_or("PONG_WAIT_SECS", 60)),
            write_wait: Duration::from_secs(env_or("WRITE_WAIT_SECS", 10)),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            acquire_timeout: self.store_timeout,
        }
    }

    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            queue_capacity: self.hub_queue_capacity,
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            outbound_capacity: self.client_queue_capacity,
            ping_interval: self.ping_interval,
            pong_wait: self.pong_wait,
            write_wait: self.write_wait,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            db_max_connections: 25,
            lock_timeout: Duration::from_millis(5000),
            store_timeout: Duration::from_millis(10_000),
            client_queue_capacity: 256,
            hub_queue_capacity: 1024,
            ping_interval: Duration::from_secs(54),
            pong_wait: Duration::from_secs(60),
            write_wait: Duration::from_secs(10),
        }
    }
}
