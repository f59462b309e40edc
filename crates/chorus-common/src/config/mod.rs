//! Configuration structs

mod app_config;

pub use app_config::{
    AppConfig, AppSettings, AuthConfig, BackoffConfig, CacheSettings, Compression, ConfigError,
    Environment, GatewayConfig, HttpConfig, ShardCount,
};
