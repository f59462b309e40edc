//! User entity - a platform account, shared by every guild it is a member of

use serde::{Deserialize, Serialize};

use crate::value_objects::Snowflake;

/// User entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Snowflake,
    pub username: String,
    #[serde(default)]
    pub discriminator: String,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub bot: bool,
}

impl User {
    /// Create a new User
    pub fn new(id: Snowflake, username: impl Into<String>, discriminator: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            discriminator: discriminator.into(),
            avatar: None,
            bot: false,
        }
    }

    /// `name#discriminator`
    pub fn tag(&self) -> String {
        format!("{}#{}", self.username, self.discriminator)
    }

    /// Mention string usable in message content
    pub fn mention(&self) -> String {
        format!("<@{}>", self.id)
    }

    /// CDN URL of the avatar, if one is set
    pub fn avatar_url(&self) -> Option<String> {
        self.avatar.as_ref().map(|hash| {
            let ext = if hash.starts_with("a_") { "gif" } else { "png" };
            format!("https://cdn.discordapp.com/avatars/{}/{hash}.{ext}", self.id)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_deserialize_partial() {
        let user: User =
            serde_json::from_str(r#"{"id":"80351110224678912","username":"Nelly"}"#).unwrap();
        assert_eq!(user.id, Snowflake::new(80_351_110_224_678_912));
        assert!(!user.bot);
        assert!(user.avatar.is_none());
    }

    #[test]
    fn test_tag_and_mention() {
        let user = User::new(Snowflake::new(42), "Nelly", "1337");
        assert_eq!(user.tag(), "Nelly#1337");
        assert_eq!(user.mention(), "<@42>");
    }

    #[test]
    fn test_avatar_url() {
        let mut user = User::new(Snowflake::new(42), "Nelly", "1337");
        assert!(user.avatar_url().is_none());

        user.avatar = Some("a_abc".to_string());
        assert_eq!(
            user.avatar_url().as_deref(),
            Some("https://cdn.discordapp.com/avatars/42/a_abc.gif")
        );
    }
}
