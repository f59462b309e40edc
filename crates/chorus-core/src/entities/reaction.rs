//! Reaction entity - an emoji reaction tally on a message

use serde::{Deserialize, Serialize};

use crate::value_objects::Snowflake;

/// Emoji identity of a reaction: custom emoji carry an id, unicode emoji only a name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReactionEmoji {
    #[serde(default)]
    pub id: Option<Snowflake>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub animated: bool,
}

impl ReactionEmoji {
    /// A unicode emoji
    pub fn unicode(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: Some(name.into()),
            animated: false,
        }
    }

    /// Same emoji, ignoring the name of custom emoji (which may be renamed)
    pub fn matches(&self, other: &ReactionEmoji) -> bool {
        match (self.id, other.id) {
            (Some(a), Some(b)) => a == b,
            (None, None) => self.name == other.name,
            _ => false,
        }
    }
}

/// Reaction tally on a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    pub emoji: ReactionEmoji,
    pub count: u32,
    /// The current user is one of the reactors
    #[serde(default)]
    pub me: bool,
}

impl Reaction {
    pub fn new(emoji: ReactionEmoji) -> Self {
        Self {
            emoji,
            count: 0,
            me: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emoji_matching() {
        let custom = ReactionEmoji {
            id: Some(Snowflake::new(1)),
            name: Some("blob".to_string()),
            animated: false,
        };
        let renamed = ReactionEmoji {
            name: Some("blobcat".to_string()),
            ..custom.clone()
        };
        assert!(custom.matches(&renamed));
        assert!(ReactionEmoji::unicode("👍").matches(&ReactionEmoji::unicode("👍")));
        assert!(!ReactionEmoji::unicode("blob").matches(&custom));
    }
}
