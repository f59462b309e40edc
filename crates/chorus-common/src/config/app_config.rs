//! Application configuration structs
//!
//! Loads configuration from environment variables (and a `.env` file if present).

use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub app: AppSettings,
    pub auth: AuthConfig,
    pub http: HttpConfig,
    pub gateway: GatewayConfig,
    pub cache: CacheSettings,
}

/// General application settings
#[derive(Debug, Clone)]
pub struct AppSettings {
    pub name: String,
    pub env: Environment,
}

/// Environment type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Environment {
    #[must_use]
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    #[must_use]
    pub fn is_development(&self) -> bool {
        matches!(self, Self::Development)
    }
}

/// Credentials used for IDENTIFY and HTTP requests
#[derive(Clone)]
pub struct AuthConfig {
    pub token: String,
    /// Log in as a user account instead of a bot
    pub user_account: bool,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("token", &"<redacted>")
            .field("user_account", &self.user_account)
            .finish()
    }
}

impl AuthConfig {
    /// Value for the `Authorization` header
    #[must_use]
    pub fn authorization(&self) -> String {
        if self.user_account {
            self.token.clone()
        } else {
            format!("Bot {}", self.token)
        }
    }
}

/// HTTP collaborator configuration
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub api_base: String,
    pub timeout: Duration,
}

/// Shard count: fixed, or asked from the HTTP API at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardCount {
    Auto,
    Fixed(u32),
}

impl FromStr for ShardCount {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("auto") {
            return Ok(Self::Auto);
        }
        match s.parse::<u32>() {
            Ok(0) => Err("shard count must be at least 1".to_string()),
            Ok(n) => Ok(Self::Fixed(n)),
            Err(_) => Err(format!("expected \"auto\" or a number, got {s:?}")),
        }
    }
}

/// Gateway transport compression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    None,
    /// Each binary frame is a complete zlib document
    Payload,
    /// One zlib context for the whole connection (`compress=zlib-stream`)
    #[default]
    Stream,
}

impl FromStr for Compression {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "off" => Ok(Self::None),
            "payload" => Ok(Self::Payload),
            "stream" | "zlib-stream" => Ok(Self::Stream),
            _ => Err(format!("Invalid compression mode: {s}")),
        }
    }
}

/// Reconnect backoff: exponential with full jitter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    pub base: Duration,
    pub max: Duration,
    /// Consecutive failures before the shard gives up; `None` retries forever
    pub max_attempts: Option<u32>,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(default_backoff_base_ms()),
            max: Duration::from_millis(default_backoff_max_ms()),
            max_attempts: None,
        }
    }
}

/// Gateway connection configuration
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Skip the HTTP gateway lookup and connect here
    pub url: Option<String>,
    pub version: u8,
    pub shards: ShardCount,
    pub compression: Compression,
    pub large_threshold: u16,
    pub identify_interval: Duration,
    pub backoff: BackoffConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: None,
            version: default_gateway_version(),
            shards: ShardCount::Fixed(1),
            compression: Compression::default(),
            large_threshold: default_large_threshold(),
            identify_interval: Duration::from_millis(default_identify_interval_ms()),
            backoff: BackoffConfig::default(),
        }
    }
}

/// Object cache configuration
#[derive(Debug, Clone, Copy)]
pub struct CacheSettings {
    /// Messages kept per channel
    pub max_messages: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_messages: default_max_messages(),
        }
    }
}

// Default value functions
fn default_app_name() -> String {
    "chorus".to_string()
}

fn default_api_base() -> String {
    "https://discord.com/api/v6".to_string()
}

fn default_http_timeout_secs() -> u64 {
    30
}

fn default_gateway_version() -> u8 {
    6
}

fn default_large_threshold() -> u16 {
    250
}

fn default_identify_interval_ms() -> u64 {
    5_000
}

fn default_backoff_base_ms() -> u64 {
    1_000
}

fn default_backoff_max_ms() -> u64 {
    60_000
}

fn default_max_messages() -> usize {
    500
}

/// Parse an optional variable, falling back to `default` when unset.
fn parse_var<T, F>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: F,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: FnOnce() -> T,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidValue(key, e.to_string())),
        None => Ok(default()),
    }
}

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// # Errors
    /// Returns an error if `CHORUS_TOKEN` is missing or a variable cannot be parsed
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let token = lookup("CHORUS_TOKEN")
            .filter(|t| !t.trim().is_empty())
            .ok_or(ConfigError::MissingVar("CHORUS_TOKEN"))?;

        let large_threshold: u16 = parse_var(&lookup, "CHORUS_LARGE_THRESHOLD", default_large_threshold)?;
        if !(50..=250).contains(&large_threshold) {
            return Err(ConfigError::InvalidValue(
                "CHORUS_LARGE_THRESHOLD",
                format!("{large_threshold} is outside 50..=250"),
            ));
        }

        let max_messages: usize = parse_var(&lookup, "CHORUS_MAX_MESSAGES", default_max_messages)?;
        if max_messages == 0 {
            return Err(ConfigError::InvalidValue(
                "CHORUS_MAX_MESSAGES",
                "must be at least 1".to_string(),
            ));
        }

        let max_attempts = match lookup("CHORUS_MAX_RECONNECTS") {
            Some(raw) => Some(raw.trim().parse::<u32>().map_err(|e| {
                ConfigError::InvalidValue("CHORUS_MAX_RECONNECTS", e.to_string())
            })?),
            None => None,
        };

        Ok(Self {
            app: AppSettings {
                name: lookup("APP_NAME").unwrap_or_else(default_app_name),
                env: lookup("APP_ENV")
                    .and_then(|s| match s.to_lowercase().as_str() {
                        "production" => Some(Environment::Production),
                        "staging" => Some(Environment::Staging),
                        "development" => Some(Environment::Development),
                        _ => None,
                    })
                    .unwrap_or_default(),
            },
            auth: AuthConfig {
                token,
                user_account: parse_var(&lookup, "CHORUS_USER_ACCOUNT", || false)?,
            },
            http: HttpConfig {
                api_base: lookup("CHORUS_API_BASE")
                    .map(|s| s.trim_end_matches('/').to_string())
                    .unwrap_or_else(default_api_base),
                timeout: Duration::from_secs(parse_var(
                    &lookup,
                    "CHORUS_HTTP_TIMEOUT_SECS",
                    default_http_timeout_secs,
                )?),
            },
            gateway: GatewayConfig {
                url: lookup("CHORUS_GATEWAY_URL"),
                version: parse_var(&lookup, "CHORUS_GATEWAY_VERSION", default_gateway_version)?,
                shards: parse_var(&lookup, "CHORUS_SHARDS", || ShardCount::Fixed(1))?,
                compression: parse_var(&lookup, "CHORUS_COMPRESSION", Compression::default)?,
                large_threshold,
                identify_interval: Duration::from_millis(parse_var(
                    &lookup,
                    "CHORUS_IDENTIFY_INTERVAL_MS",
                    default_identify_interval_ms,
                )?),
                backoff: BackoffConfig {
                    base: Duration::from_millis(parse_var(
                        &lookup,
                        "CHORUS_BACKOFF_BASE_MS",
                        default_backoff_base_ms,
                    )?),
                    max: Duration::from_millis(parse_var(
                        &lookup,
                        "CHORUS_BACKOFF_MAX_MS",
                        default_backoff_max_ms,
                    )?),
                    max_attempts,
                },
            },
            cache: CacheSettings { max_messages },
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_with_only_token() {
        let config = AppConfig::from_lookup(lookup(&[("CHORUS_TOKEN", "abc")])).unwrap();
        assert_eq!(config.app.name, "chorus");
        assert!(config.app.env.is_development());
        assert_eq!(config.auth.authorization(), "Bot abc");
        assert_eq!(config.gateway.shards, ShardCount::Fixed(1));
        assert_eq!(config.gateway.compression, Compression::Stream);
        assert_eq!(config.gateway.large_threshold, 250);
        assert_eq!(config.gateway.identify_interval, Duration::from_secs(5));
        assert_eq!(config.gateway.backoff.max, Duration::from_secs(60));
        assert!(config.gateway.backoff.max_attempts.is_none());
        assert_eq!(config.cache.max_messages, 500);
    }

    #[test]
    fn test_missing_token() {
        let err = AppConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar("CHORUS_TOKEN")));
    }

    #[test]
    fn test_overrides() {
        let config = AppConfig::from_lookup(lookup(&[
            ("CHORUS_TOKEN", "abc"),
            ("CHORUS_USER_ACCOUNT", "true"),
            ("CHORUS_SHARDS", "auto"),
            ("CHORUS_COMPRESSION", "payload"),
            ("CHORUS_LARGE_THRESHOLD", "100"),
            ("CHORUS_MAX_RECONNECTS", "3"),
            ("CHORUS_API_BASE", "http://localhost:8080/api/"),
            ("APP_ENV", "production"),
        ]))
        .unwrap();

        assert_eq!(config.auth.authorization(), "abc");
        assert_eq!(config.gateway.shards, ShardCount::Auto);
        assert_eq!(config.gateway.compression, Compression::Payload);
        assert_eq!(config.gateway.large_threshold, 100);
        assert_eq!(config.gateway.backoff.max_attempts, Some(3));
        assert_eq!(config.http.api_base, "http://localhost:8080/api");
        assert!(config.app.env.is_production());
    }

    #[test]
    fn test_invalid_values() {
        let err = AppConfig::from_lookup(lookup(&[
            ("CHORUS_TOKEN", "abc"),
            ("CHORUS_LARGE_THRESHOLD", "1000"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue("CHORUS_LARGE_THRESHOLD", _)));

        let err = AppConfig::from_lookup(lookup(&[("CHORUS_TOKEN", "abc"), ("CHORUS_SHARDS", "0")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue("CHORUS_SHARDS", _)));
    }

    #[test]
    fn test_token_is_redacted_in_debug() {
        let auth = AuthConfig {
            token: "secret".to_string(),
            user_account: false,
        };
        assert!(!format!("{auth:?}").contains("secret"));
    }
}
