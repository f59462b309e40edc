//! Voice state of a user in a guild

use serde::{Deserialize, Serialize};

use crate::value_objects::Snowflake;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceState {
    pub user_id: Snowflake,
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
    /// `None` once the user has left voice
    #[serde(default)]
    pub channel_id: Option<Snowflake>,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub deaf: bool,
    #[serde(default)]
    pub mute: bool,
    #[serde(default)]
    pub self_deaf: bool,
    #[serde(default)]
    pub self_mute: bool,
    #[serde(default)]
    pub suppress: bool,
}

impl VoiceState {
    /// Still connected to a voice channel
    pub fn is_connected(&self) -> bool {
        self.channel_id.is_some()
    }
}
