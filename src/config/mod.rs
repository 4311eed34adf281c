//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::time::Duration;

/// Application configuration loaded from `ARENA_`-prefixed environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub http_addr: SocketAddr,
    /// Symmetric secret used to sign access and reconnect tokens
    pub jwt_secret: String,
    /// Redis address for the idempotency store (empty = in-process fallback)
    pub redis_addr: String,
    /// Room simulation tick period in milliseconds
    pub tick_ms: u64,
    /// Number of players batched into each room
    pub players_per_room: usize,
    /// Grace window for offline sessions before they are swept
    pub reconnect_ttl: Duration,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Per-connection outbound queue bound
    pub send_queue_size: usize,
    /// Maximum inbound frame size in bytes
    pub read_limit_bytes: usize,
    /// Matchmaker backlog capacity
    pub match_queue_size: usize,
    /// Per-connection inbound message rate limit (0 disables)
    pub max_msg_per_second: u32,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let http_addr = env::var("ARENA_HTTP_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        Ok(Self {
            http_addr: parse_addr(&http_addr)?,
            jwt_secret: env::var("ARENA_JWT_SECRET").unwrap_or_else(|_| "dev-secret".to_string()),
            redis_addr: env::var("ARENA_REDIS_ADDR").unwrap_or_default(),
            tick_ms: parse_var("ARENA_TICK_MS", 50)?,
            players_per_room: parse_var("ARENA_PLAYERS_PER_ROOM", 2)?,
            reconnect_ttl: Duration::from_secs(parse_var("ARENA_RECONNECT_TTL_SEC", 30)?),
            log_level: env::var("ARENA_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            send_queue_size: parse_var("ARENA_SEND_QUEUE_SIZE", 256)?,
            read_limit_bytes: parse_var("ARENA_READ_LIMIT_BYTES", 1_048_576)?,
            match_queue_size: parse_var("ARENA_MATCH_QUEUE_SIZE", 10_240)?,
            max_msg_per_second: parse_var("ARENA_MAX_MSG_PER_SECOND", 60)?,
        })
    }
}

/// Accepts both `host:port` and the bare `:port` shorthand
fn parse_addr(addr: &str) -> Result<SocketAddr, ConfigError> {
    let normalized = if addr.starts_with(':') {
        format!("0.0.0.0{}", addr)
    } else {
        addr.to_string()
    };
    normalized.parse().map_err(|_| ConfigError::InvalidAddress)
}

fn parse_var<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::Invalid(key)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid server address format")]
    InvalidAddress,

    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),
}
