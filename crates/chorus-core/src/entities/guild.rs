//! Guild entity - represents a server

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::{emoji::Emoji, voice::VoiceState};
use crate::value_objects::Snowflake;

/// Guild (server) entity
///
/// Channels, roles, and members are owned by the cache and looked up by guild id;
/// this snapshot only carries guild-level state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guild {
    pub id: Snowflake,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub owner_id: Snowflake,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub member_count: u64,
    #[serde(default)]
    pub large: bool,
    #[serde(default)]
    pub unavailable: bool,
    #[serde(default)]
    pub afk_channel_id: Option<Snowflake>,
    #[serde(default)]
    pub afk_timeout: u32,
    #[serde(default)]
    pub system_channel_id: Option<Snowflake>,
    #[serde(default)]
    pub verification_level: u8,
    #[serde(default)]
    pub mfa_level: u8,
    #[serde(default)]
    pub emojis: Vec<Emoji>,
    /// Voice states keyed by user id
    #[serde(skip)]
    pub voice_states: HashMap<Snowflake, VoiceState>,
    /// Shard this guild is served by
    #[serde(skip)]
    pub shard_id: u32,
    /// Every member has been streamed in
    #[serde(skip)]
    pub chunked: bool,
    /// A GUILD_SYNC has been applied (user accounts only)
    #[serde(skip)]
    pub synced: bool,
}

impl Guild {
    /// Create a new, available Guild
    pub fn new(id: Snowflake, name: impl Into<String>, owner_id: Snowflake) -> Self {
        Self {
            id,
            name: name.into(),
            icon: None,
            owner_id,
            region: None,
            features: Vec::new(),
            member_count: 0,
            large: false,
            unavailable: false,
            afk_channel_id: None,
            afk_timeout: 0,
            system_channel_id: None,
            verification_level: 0,
            mfa_level: 0,
            emojis: Vec::new(),
            voice_states: HashMap::new(),
            shard_id: 0,
            chunked: false,
            synced: false,
        }
    }

    /// Placeholder for a guild announced in READY but not streamed yet
    pub fn unavailable(id: Snowflake) -> Self {
        Self {
            unavailable: true,
            ..Self::new(id, String::new(), Snowflake::default())
        }
    }

    /// Check if a user is the guild owner
    #[inline]
    pub fn is_owner(&self, user_id: Snowflake) -> bool {
        self.owner_id == user_id
    }

    /// Id of the @everyone role
    #[inline]
    pub fn default_role_id(&self) -> Snowflake {
        self.id
    }

    /// Check if the guild advertises a feature flag
    pub fn has_feature(&self, feature: &str) -> bool {
        self.features.iter().any(|f| f == feature)
    }

    /// Get the guild icon URL if set
    pub fn icon_url(&self) -> Option<String> {
        self.icon
            .as_ref()
            .map(|hash| format!("https://cdn.discordapp.com/icons/{}/{hash}.png", self.id))
    }

    /// Look up an emoji by id
    pub fn emoji(&self, emoji_id: Snowflake) -> Option<&Emoji> {
        self.emojis.iter().find(|e| e.id == emoji_id)
    }
}
