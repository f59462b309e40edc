//! Bounded per-channel message buffers

use std::collections::{HashMap, VecDeque};

use chorus_core::{Message, Snowflake};

/// Ring buffers of recent messages, one per channel, oldest at the front
#[derive(Debug)]
pub(crate) struct MessageStore {
    capacity: usize,
    channels: HashMap<Snowflake, VecDeque<Message>>,
}

impl MessageStore {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            channels: HashMap::new(),
        }
    }

    /// Append a message, returning whatever fell off the front.
    ///
    /// A message that is already buffered is replaced in place (replayed creates).
    pub(crate) fn push(&mut self, message: Message) -> Option<Message> {
        if self.capacity == 0 {
            return Some(message);
        }

        let buffer = self.channels.entry(message.channel_id).or_default();
        if let Some(existing) = buffer.iter_mut().rev().find(|m| m.id == message.id) {
            *existing = message;
            return None;
        }

        buffer.push_back(message);
        if buffer.len() > self.capacity {
            buffer.pop_front()
        } else {
            None
        }
    }

    pub(crate) fn get(&self, channel_id: Snowflake, message_id: Snowflake) -> Option<&Message> {
        self.channels
            .get(&channel_id)?
            .iter()
            .rev()
            .find(|m| m.id == message_id)
    }

    pub(crate) fn get_mut(
        &mut self,
        channel_id: Snowflake,
        message_id: Snowflake,
    ) -> Option<&mut Message> {
        self.channels
            .get_mut(&channel_id)?
            .iter_mut()
            .rev()
            .find(|m| m.id == message_id)
    }

    pub(crate) fn remove(&mut self, channel_id: Snowflake, message_id: Snowflake) -> Option<Message> {
        let buffer = self.channels.get_mut(&channel_id)?;
        let index = buffer.iter().rposition(|m| m.id == message_id)?;
        buffer.remove(index)
    }

    /// Apply `f` to a buffered message and move it to the back (most recent).
    pub(crate) fn update(
        &mut self,
        channel_id: Snowflake,
        message_id: Snowflake,
        f: impl FnOnce(&mut Message),
    ) -> Option<(Message, Message)> {
        let buffer = self.channels.get_mut(&channel_id)?;
        let index = buffer.iter().rposition(|m| m.id == message_id)?;
        let mut message = buffer.remove(index)?;
        let old = message.clone();
        f(&mut message);
        buffer.push_back(message.clone());
        Some((old, message))
    }

    /// Forget every message of a channel
    pub(crate) fn drop_channel(&mut self, channel_id: Snowflake) -> usize {
        self.channels.remove(&channel_id).map_or(0, |b| b.len())
    }

    pub(crate) fn channel(&self, channel_id: Snowflake) -> Vec<Message> {
        self.channels
            .get(&channel_id)
            .map(|b| b.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub(crate) fn is_author(&self, user_id: Snowflake) -> bool {
        self.channels
            .values()
            .flatten()
            .any(|m| m.author_id == user_id)
    }

    pub(crate) fn len(&self) -> usize {
        self.channels.values().map(VecDeque::len).sum()
    }
}
