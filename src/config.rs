//! Application configuration, loaded from the environment.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use tracing::warn;

/// Development-only fallback key, matching the 32-byte AES-256 length.
const DEV_ENCRYPTION_KEY: &str = "0123456789abcdef0123456789abcdef";

#[derive(Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub database_url: String,
    /// 32-byte key for the credential vault.
    pub encryption_key: String,
    pub exchange_api_base: String,
    /// Bound on each exchange order call.
    pub exchange_timeout: Duration,
    /// Bearer token → user id, standing in for the identity subsystem's
    /// session verification.
    pub api_tokens: HashMap<String, String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3002)),
            database_url: "sqlite://data/tradepipe.db".to_string(),
            encryption_key: DEV_ENCRYPTION_KEY.to_string(),
            exchange_api_base: "https://testnet.binance.vision".to_string(),
            exchange_timeout: Duration::from_secs(10),
            api_tokens: HashMap::new(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults with a warning on missing or unparsable values.
    pub fn from_env() -> Self {
        let mut config = AppConfig::default();

        if let Ok(addr) = std::env::var("BIND_ADDR") {
            match addr.parse() {
                Ok(value) => config.bind_addr = value,
                Err(e) => warn!(
                    "Failed to parse BIND_ADDR '{}': {}, using default: {}",
                    addr, e, config.bind_addr
                ),
            }
        }

        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database_url = url;
        }

        match std::env::var("ENCRYPTION_KEY") {
            Ok(key) => config.encryption_key = key,
            Err(_) => warn!(
                "ENCRYPTION_KEY not set, using development key (INSECURE for production)"
            ),
        }

        if let Ok(base) = std::env::var("EXCHANGE_API_URL") {
            config.exchange_api_base = base;
        }

        if let Ok(timeout) = std::env::var("EXCHANGE_TIMEOUT_SECS") {
            match timeout.parse::<u64>() {
                Ok(value) if value > 0 => {
                    config.exchange_timeout = Duration::from_secs(value);
                }
                Ok(value) => warn!(
                    "Invalid EXCHANGE_TIMEOUT_SECS value: {} (must be positive), using default",
                    value
                ),
                Err(e) => warn!(
                    "Failed to parse EXCHANGE_TIMEOUT_SECS '{}': {}, using default",
                    timeout, e
                ),
            }
        }

        if let Ok(tokens) = std::env::var("API_TOKENS") {
            config.api_tokens = parse_api_tokens(&tokens);
        }

        config
    }
}

/// Parse `token:user_id` pairs from a comma-separated list, skipping
/// malformed entries with a warning.
fn parse_api_tokens(raw: &str) -> HashMap<String, String> {
    let mut tokens = HashMap::new();
    for entry in raw.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        match entry.split_once(':') {
            Some((token, user_id)) if !token.is_empty() && !user_id.is_empty() => {
                tokens.insert(token.to_string(), user_id.to_string());
            }
            _ => warn!("Ignoring malformed API_TOKENS entry: {}", entry),
        }
    }
    tokens
}
