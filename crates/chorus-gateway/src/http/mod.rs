//! HTTP collaborator
//!
//! The gateway only needs a handful of REST calls: where to connect and how many shards
//! to run at startup, plus lookups an application asks for explicitly.

mod rest;

pub use rest::RestClient;

use async_trait::async_trait;
use chorus_core::{Message, Snowflake, User};
use serde::Deserialize;

/// Response of `GET /gateway/bot`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GatewayBot {
    pub url: String,
    #[serde(default = "default_shards")]
    pub shards: u32,
    #[serde(default)]
    pub session_start_limit: Option<SessionStartLimit>,
}

/// Identify budget reported alongside the gateway URL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct SessionStartLimit {
    pub total: u32,
    pub remaining: u32,
    /// Milliseconds until `remaining` resets
    pub reset_after: u64,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: u32,
}

fn default_shards() -> u32 {
    1
}

fn default_max_concurrency() -> u32 {
    1
}

/// HTTP failures
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("unauthorized: the token was rejected")]
    Unauthorized,

    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// REST calls the gateway client relies on
#[async_trait]
pub trait GatewayHttp: Send + Sync + 'static {
    /// Gateway URL and recommended shard count
    async fn gateway_bot(&self) -> Result<GatewayBot, HttpError>;

    async fn fetch_user(&self, user_id: Snowflake) -> Result<User, HttpError>;

    /// A message together with its author
    async fn fetch_message(
        &self,
        channel_id: Snowflake,
        message_id: Snowflake,
    ) -> Result<(Message, User), HttpError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_bot_defaults() {
        let bot: GatewayBot = serde_json::from_str(r#"{"url":"wss://gateway.example"}"#).unwrap();
        assert_eq!(bot.shards, 1);
        assert!(bot.session_start_limit.is_none());
    }

    #[test]
    fn test_gateway_bot_with_limits() {
        let bot: GatewayBot = serde_json::from_str(
            r#"{
                "url": "wss://gateway.example",
                "shards": 4,
                "session_start_limit": {"total": 1000, "remaining": 997, "reset_after": 14400000}
            }"#,
        )
        .unwrap();

        assert_eq!(bot.shards, 4);
        let limit = bot.session_start_limit.unwrap();
        assert_eq!(limit.remaining, 997);
        assert_eq!(limit.max_concurrency, 1);
    }
}
