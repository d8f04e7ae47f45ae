use std::env;

/// Keys that must never run in production. Startup aborts if any configured
/// key matches one of these (after trimming) or is shorter than 32 bytes.
const KEY_BLOCKLIST: &[&str] = &[
    "changeme",
    "secret",
    "default",
    "wirechat-dev-key",
    "00000000000000000000000000000000",
];

pub const MIN_KEY_BYTES: usize = 32;

/// Token issuer embedded in bearer-token claims.
pub const TOKEN_ISSUER: &str = "wirechat";

/// Server-wide configuration. All values read from environment variables
/// with sensible defaults; secret keys have no default and must be set.
///
/// Environment variables:
/// - `DATABASE_PATH` — SQLite file path (default: data/chat.db)
/// - `TOKEN_KEY` — bearer-token signing key, ≥32 bytes
/// - `CONTENT_KEY` — at-rest AEAD key, ≥32 bytes
/// - `INVITE_KEY` — invite token key, ≥32 bytes
/// - `MAX_FRAME_BYTES` — max inbound message payload (default: 131072)
/// - `RATE_LIMIT_MESSAGES` — frames per second per session (default: 30)
/// - `RATE_LIMIT_AUTH` — login attempts per minute per name (default: 10)
/// - `EDIT_WINDOW_SECS` — edit window (default: 900)
/// - `UNSEND_WINDOW_SECS` — unsend window (default: 300)
/// - `MAX_EDIT_COUNT` — max edits per message (default: 10)
/// - `DISAPPEARING_TTLS` — comma list of allowed TTL seconds
/// - `TOKEN_LIFETIME_SECS` — bearer token lifetime (default: 14 days)
/// - `ALLOWED_ORIGINS` — comma list; empty or `*` allows all; `*.suffix` wildcards
/// - `HEARTBEAT_SECS`, `IDLE_TIMEOUT_SECS` — liveness probing
/// - `HANDLER_TIMEOUT_SECS` — per-request deadline (default: 10)
/// - `EXPIRE_INTERVAL_SECS` — expirer sweep interval (default: 60)
/// - `SEND_QUEUE_DEPTH` — outbound frames buffered per session (default: 128)
#[derive(Clone)]
pub struct Config {
    pub db_path: String,
    pub token_key: Vec<u8>,
    pub content_key: Vec<u8>,
    pub invite_key: Vec<u8>,
    pub max_frame_bytes: usize,
    pub messages_per_sec: usize,
    pub auth_per_min: usize,
    pub edit_window_secs: i64,
    pub unsend_window_secs: i64,
    pub max_edit_count: i64,
    pub disappearing_ttls: Vec<i64>,
    pub token_lifetime_secs: i64,
    pub allowed_origins: Vec<String>,
    pub heartbeat_secs: u64,
    pub idle_timeout_secs: u64,
    pub handler_timeout_secs: u64,
    pub expire_interval_secs: u64,
    pub send_queue_depth: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: "data/chat.db".to_string(),
            token_key: Vec::new(),
            content_key: Vec::new(),
            invite_key: Vec::new(),
            max_frame_bytes: 128 * 1024,
            messages_per_sec: 30,
            auth_per_min: 10,
            edit_window_secs: 900,
            unsend_window_secs: 300,
            max_edit_count: 10,
            disappearing_ttls: vec![0, 10, 30, 60, 300, 3600, 86400, 604800],
            token_lifetime_secs: 14 * 24 * 3600,
            allowed_origins: Vec::new(),
            heartbeat_secs: 30,
            idle_timeout_secs: 90,
            handler_timeout_secs: 10,
            expire_interval_secs: 60,
            send_queue_depth: 128,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    MissingKey(&'static str),
    #[error("{0} is too short or matches a known-default value")]
    WeakKey(&'static str),
}

fn read_key(var: &'static str) -> Result<Vec<u8>, ConfigError> {
    let raw = env::var(var).map_err(|_| ConfigError::MissingKey(var))?;
    validate_key(var, normalize_key(raw.trim()))
}

/// Keys are raw bytes, or hex when the value decodes as such.
fn normalize_key(raw: &str) -> Vec<u8> {
    if raw.len() >= 2 * MIN_KEY_BYTES && raw.chars().all(|c| c.is_ascii_hexdigit()) {
        hex::decode(raw).unwrap_or_else(|_| raw.as_bytes().to_vec())
    } else {
        raw.as_bytes().to_vec()
    }
}

fn validate_key(var: &'static str, key: Vec<u8>) -> Result<Vec<u8>, ConfigError> {
    if key.len() < MIN_KEY_BYTES {
        return Err(ConfigError::WeakKey(var));
    }
    let lower = String::from_utf8_lossy(&key).to_lowercase();
    if KEY_BLOCKLIST.iter().any(|bad| lower == *bad) || key.iter().all(|b| *b == 0) {
        return Err(ConfigError::WeakKey(var));
    }
    Ok(key)
}

impl Config {
    /// Create a Config from environment variables, with defaults. Secret
    /// keys are mandatory and validated against the blocklist.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        config.token_key = read_key("TOKEN_KEY")?;
        config.content_key = read_key("CONTENT_KEY")?;
        config.invite_key = read_key("INVITE_KEY")?;

        if let Ok(val) = env::var("DATABASE_PATH") {
            config.db_path = val;
        }
        if let Ok(val) = env::var("MAX_FRAME_BYTES")
            && let Ok(n) = val.parse::<usize>()
        {
            config.max_frame_bytes = n;
        }
        if let Ok(val) = env::var("RATE_LIMIT_MESSAGES")
            && let Ok(n) = val.parse::<usize>()
        {
            config.messages_per_sec = n;
        }
        if let Ok(val) = env::var("RATE_LIMIT_AUTH")
            && let Ok(n) = val.parse::<usize>()
        {
            config.auth_per_min = n;
        }
        if let Ok(val) = env::var("EDIT_WINDOW_SECS")
            && let Ok(n) = val.parse::<i64>()
        {
            config.edit_window_secs = n;
        }
        if let Ok(val) = env::var("UNSEND_WINDOW_SECS")
            && let Ok(n) = val.parse::<i64>()
        {
            config.unsend_window_secs = n;
        }
        if let Ok(val) = env::var("MAX_EDIT_COUNT")
            && let Ok(n) = val.parse::<i64>()
        {
            config.max_edit_count = n;
        }
        if let Ok(val) = env::var("DISAPPEARING_TTLS") {
            let ttls: Vec<i64> = val
                .split(',')
                .filter_map(|s| s.trim().parse::<i64>().ok())
                .collect();
            if !ttls.is_empty() {
                config.disappearing_ttls = ttls;
            }
        }
        if let Ok(val) = env::var("TOKEN_LIFETIME_SECS")
            && let Ok(n) = val.parse::<i64>()
        {
            config.token_lifetime_secs = n;
        }
        if let Ok(val) = env::var("ALLOWED_ORIGINS") {
            config.allowed_origins = val
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Ok(val) = env::var("HEARTBEAT_SECS")
            && let Ok(n) = val.parse::<u64>()
        {
            config.heartbeat_secs = n;
        }
        if let Ok(val) = env::var("IDLE_TIMEOUT_SECS")
            && let Ok(n) = val.parse::<u64>()
        {
            config.idle_timeout_secs = n;
        }
        if let Ok(val) = env::var("HANDLER_TIMEOUT_SECS")
            && let Ok(n) = val.parse::<u64>()
        {
            config.handler_timeout_secs = n;
        }
        if let Ok(val) = env::var("EXPIRE_INTERVAL_SECS")
            && let Ok(n) = val.parse::<u64>()
        {
            config.expire_interval_secs = n;
        }
        if let Ok(val) = env::var("SEND_QUEUE_DEPTH")
            && let Ok(n) = val.parse::<usize>()
        {
            config.send_queue_depth = n;
        }

        Ok(config)
    }

    /// True if `origin` passes the allow-list. Empty list or `*` allows all;
    /// entries match exactly or as `*.suffix` wildcards.
    pub fn origin_allowed(&self, origin: &str) -> bool {
        if self.allowed_origins.is_empty() {
            return true;
        }
        self.allowed_origins.iter().any(|allowed| {
            if allowed == "*" {
                true
            } else if let Some(suffix) = allowed.strip_prefix("*.") {
                origin.ends_with(suffix)
            } else {
                allowed == origin
            }
        })
    }
}
