//! Control payloads exchanged outside of dispatches

use chorus_core::{Activity, Snowflake, Status};
use serde::{Deserialize, Serialize};

/// Payload for op 10 (Hello)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloPayload {
    /// Heartbeat interval in milliseconds
    pub heartbeat_interval: u64,
    /// Servers that handled the connection
    #[serde(rename = "_trace", default)]
    pub trace: Vec<String>,
}

impl HelloPayload {
    pub const DEFAULT_HEARTBEAT_INTERVAL: u64 = 45_000;

    #[must_use]
    pub fn with_interval(heartbeat_interval: u64) -> Self {
        Self {
            heartbeat_interval,
            trace: Vec::new(),
        }
    }
}

/// Payload for op 2 (Identify)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifyPayload {
    pub token: String,
    pub properties: IdentifyProperties,
    /// Per-payload zlib compression
    pub compress: bool,
    /// Member count above which a guild is streamed without offline members
    pub large_threshold: u16,
    pub v: u8,
    /// `[shard_id, shard_count]`
    pub shard: [u32; 2],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence: Option<StatusUpdatePayload>,
}

/// Client connection properties
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifyProperties {
    #[serde(rename = "$os")]
    pub os: String,
    #[serde(rename = "$browser")]
    pub browser: String,
    #[serde(rename = "$device")]
    pub device: String,
    #[serde(rename = "$referrer", default)]
    pub referrer: String,
    #[serde(rename = "$referring_domain", default)]
    pub referring_domain: String,
}

impl Default for IdentifyProperties {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            browser: env!("CARGO_PKG_NAME").to_string(),
            device: env!("CARGO_PKG_NAME").to_string(),
            referrer: String::new(),
            referring_domain: String::new(),
        }
    }
}

/// Payload for op 6 (Resume)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumePayload {
    pub token: String,
    pub session_id: String,
    /// Last sequence number received
    pub seq: u64,
}

/// Payload for op 3 (Presence)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdatePayload {
    /// Unix millis since the client went idle; only set when AFK
    pub since: Option<i64>,
    pub game: Option<Activity>,
    pub status: Status,
    pub afk: bool,
}

impl StatusUpdatePayload {
    #[must_use]
    pub fn new(status: Status, game: Option<Activity>, afk: bool) -> Self {
        Self {
            since: afk.then(|| chrono::Utc::now().timestamp_millis()),
            game,
            status,
            afk,
        }
    }
}

/// Payload for op 8 (Request Guild Members)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMembersPayload {
    pub guild_id: Vec<Snowflake>,
    pub query: String,
    /// 0 requests every member
    pub limit: u32,
}

impl RequestMembersPayload {
    /// Most guild ids the gateway accepts in one request
    pub const MAX_GUILDS: usize = 75;

    /// Ask for every member of the given guilds
    #[must_use]
    pub fn all(guild_ids: Vec<Snowflake>) -> Self {
        Self {
            guild_id: guild_ids,
            query: String::new(),
            limit: 0,
        }
    }
}
