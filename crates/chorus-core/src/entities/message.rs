//! Message entity - represents a chat message held in the per-channel message cache

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::reaction::{Reaction, ReactionEmoji};
use crate::value_objects::Snowflake;

/// Message entity
///
/// The author is stored by id; resolve it through the user cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Snowflake,
    pub channel_id: Snowflake,
    pub guild_id: Option<Snowflake>,
    pub author_id: Snowflake,
    pub content: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub edited_timestamp: Option<DateTime<Utc>>,
    pub tts: bool,
    pub pinned: bool,
    pub mention_everyone: bool,
    pub mentions: Vec<Snowflake>,
    pub mention_roles: Vec<Snowflake>,
    pub attachments: Vec<serde_json::Value>,
    pub embeds: Vec<serde_json::Value>,
    pub reactions: Vec<Reaction>,
    pub kind: u8,
}

impl Message {
    /// Create a new Message
    pub fn new(
        id: Snowflake,
        channel_id: Snowflake,
        author_id: Snowflake,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id,
            channel_id,
            guild_id: None,
            author_id,
            content: content.into(),
            timestamp: None,
            edited_timestamp: None,
            tts: false,
            pinned: false,
            mention_everyone: false,
            mentions: Vec::new(),
            mention_roles: Vec::new(),
            attachments: Vec::new(),
            embeds: Vec::new(),
            reactions: Vec::new(),
            kind: 0,
        }
    }

    /// Check if the message has been edited
    #[inline]
    pub fn is_edited(&self) -> bool {
        self.edited_timestamp.is_some()
    }

    /// Record a reaction and return the updated tally
    pub fn add_reaction(&mut self, emoji: &ReactionEmoji, me: bool) -> Reaction {
        let index = match self.reactions.iter().position(|r| r.emoji.matches(emoji)) {
            Some(index) => index,
            None => {
                self.reactions.push(Reaction::new(emoji.clone()));
                self.reactions.len() - 1
            }
        };
        let reaction = &mut self.reactions[index];
        reaction.count += 1;
        reaction.me |= me;
        reaction.clone()
    }

    /// Remove one reactor; the tally disappears at zero.
    ///
    /// Returns `None` if no reaction with that emoji was recorded.
    pub fn remove_reaction(&mut self, emoji: &ReactionEmoji, me: bool) -> Option<Reaction> {
        let index = self.reactions.iter().position(|r| r.emoji.matches(emoji))?;
        let reaction = &mut self.reactions[index];
        reaction.count = reaction.count.saturating_sub(1);
        if me {
            reaction.me = false;
        }
        let snapshot = reaction.clone();
        if snapshot.count == 0 {
            self.reactions.remove(index);
        }
        Some(snapshot)
    }

    /// Drop every reaction, returning what was there
    pub fn clear_reactions(&mut self) -> Vec<Reaction> {
        std::mem::take(&mut self.reactions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> Message {
        Message::new(Snowflake::new(1), Snowflake::new(2), Snowflake::new(3), "hi")
    }

    #[test]
    fn test_add_reaction_accumulates() {
        let mut msg = message();
        let thumbs = ReactionEmoji::unicode("👍");

        assert_eq!(msg.add_reaction(&thumbs, false).count, 1);
        let reaction = msg.add_reaction(&thumbs, true);
        assert_eq!(reaction.count, 2);
        assert!(reaction.me);
        assert_eq!(msg.reactions.len(), 1);
    }

    #[test]
    fn test_remove_reaction_drops_empty_tally() {
        let mut msg = message();
        let thumbs = ReactionEmoji::unicode("👍");
        msg.add_reaction(&thumbs, true);

        let removed = msg.remove_reaction(&thumbs, true).unwrap();
        assert_eq!(removed.count, 0);
        assert!(!removed.me);
        assert!(msg.reactions.is_empty());
        assert!(msg.remove_reaction(&thumbs, false).is_none());
    }

    #[test]
    fn test_clear_reactions() {
        let mut msg = message();
        msg.add_reaction(&ReactionEmoji::unicode("a"), false);
        msg.add_reaction(&ReactionEmoji::unicode("b"), false);

        assert_eq!(msg.clear_reactions().len(), 2);
        assert!(msg.reactions.is_empty());
        assert!(!msg.is_edited());
    }
}
