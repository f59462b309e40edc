//! Member entity - represents a user's membership in a guild

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::presence::Presence;
use crate::value_objects::Snowflake;

/// Guild member entity
///
/// Holds the user's id only. The `User` itself is shared across every guild and is
/// resolved through the cache on access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub guild_id: Snowflake,
    pub user_id: Snowflake,
    pub nick: Option<String>,
    pub roles: Vec<Snowflake>,
    pub joined_at: Option<DateTime<Utc>>,
    pub deaf: bool,
    pub mute: bool,
    pub presence: Presence,
}

impl Member {
    /// Create a new Member
    pub fn new(guild_id: Snowflake, user_id: Snowflake) -> Self {
        Self {
            guild_id,
            user_id,
            nick: None,
            roles: Vec::new(),
            joined_at: None,
            deaf: false,
            mute: false,
            presence: Presence::default(),
        }
    }

    /// Get display name (nickname if set, otherwise fallback)
    pub fn display_name<'a>(&'a self, username: &'a str) -> &'a str {
        self.nick.as_deref().unwrap_or(username)
    }

    /// Check if member has a specific role
    #[inline]
    pub fn has_role(&self, role_id: Snowflake) -> bool {
        self.roles.contains(&role_id)
    }

    /// Remove a role from the member, returning whether it was present
    pub fn remove_role(&mut self, role_id: Snowflake) -> bool {
        let before = self.roles.len();
        self.roles.retain(|&id| id != role_id);
        self.roles.len() != before
    }

    /// Mention string usable in message content
    pub fn mention(&self) -> String {
        if self.nick.is_some() {
            format!("<@!{}>", self.user_id)
        } else {
            format!("<@{}>", self.user_id)
        }
    }
}
