//! Role entity - represents a guild role with permissions

use serde::{Deserialize, Serialize};

use crate::value_objects::{Permissions, Snowflake};

/// Role entity
///
/// The default role of a guild shares the guild's id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: Snowflake,
    /// Not part of the wire object; filled in by the cache
    #[serde(default)]
    pub guild_id: Snowflake,
    pub name: String,
    #[serde(default)]
    pub color: u32,
    #[serde(default)]
    pub hoist: bool,
    #[serde(default)]
    pub position: i32,
    #[serde(default)]
    pub permissions: Permissions,
    #[serde(default)]
    pub managed: bool,
    #[serde(default)]
    pub mentionable: bool,
}

impl Role {
    /// Create a new Role
    pub fn new(
        id: Snowflake,
        guild_id: Snowflake,
        name: impl Into<String>,
        permissions: Permissions,
    ) -> Self {
        Self {
            id,
            guild_id,
            name: name.into(),
            color: 0,
            hoist: false,
            position: 0,
            permissions,
            managed: false,
            mentionable: false,
        }
    }

    /// Create the @everyone role for a guild
    pub fn everyone(guild_id: Snowflake, permissions: Permissions) -> Self {
        Self::new(guild_id, guild_id, "@everyone", permissions)
    }

    /// The guild's default role
    #[inline]
    pub fn is_everyone(&self) -> bool {
        self.id == self.guild_id
    }

    /// Compare role positions for hierarchy (higher position = more authority)
    ///
    /// Ties are broken by id: the older role ranks higher.
    pub fn is_higher_than(&self, other: &Role) -> bool {
        self.position > other.position || (self.position == other.position && self.id < other.id)
    }

    /// Get the color as a hex string (without #)
    pub fn color_hex(&self) -> String {
        format!("{:06x}", self.color)
    }
}
