//! Lock-protected object graph and its reference bookkeeping

use std::collections::{HashMap, HashSet};

use chorus_core::{Channel, Guild, Member, Relationship, Role, Snowflake, User};
use tracing::trace;

use crate::messages::MessageStore;

/// A cached guild and the children it owns
#[derive(Debug)]
pub(crate) struct GuildEntry {
    pub(crate) guild: Guild,
    pub(crate) channels: HashSet<Snowflake>,
    pub(crate) roles: HashMap<Snowflake, Role>,
    pub(crate) members: HashMap<Snowflake, Member>,
}

impl GuildEntry {
    pub(crate) fn new(guild: Guild) -> Self {
        Self {
            guild,
            channels: HashSet::new(),
            roles: HashMap::new(),
            members: HashMap::new(),
        }
    }

    /// Recompute the chunking flag after members changed
    pub(crate) fn refresh_chunked(&mut self) -> bool {
        let was = self.guild.chunked;
        if !self.guild.large || self.members.len() as u64 >= self.guild.member_count {
            self.guild.chunked = true;
        }
        !was && self.guild.chunked
    }
}

#[derive(Debug)]
pub(crate) struct CacheState {
    pub(crate) current_user: Option<User>,
    pub(crate) users: HashMap<Snowflake, User>,
    pub(crate) guilds: HashMap<Snowflake, GuildEntry>,
    /// Guild and private channels by id
    pub(crate) channels: HashMap<Snowflake, Channel>,
    pub(crate) relationships: HashMap<Snowflake, Relationship>,
    pub(crate) messages: MessageStore,
}

impl CacheState {
    pub(crate) fn new(max_messages: usize) -> Self {
        Self {
            current_user: None,
            users: HashMap::new(),
            guilds: HashMap::new(),
            channels: HashMap::new(),
            relationships: HashMap::new(),
            messages: MessageStore::new(max_messages),
        }
    }

    /// Insert or replace a user, returning the previous snapshot
    pub(crate) fn put_user(&mut self, user: User) -> Option<User> {
        if self.current_user.as_ref().is_some_and(|me| me.id == user.id) {
            self.current_user = Some(user.clone());
        }
        self.users.insert(user.id, user)
    }

    /// Drop a channel from every index, along with its messages
    pub(crate) fn drop_channel(&mut self, channel_id: Snowflake) -> Option<Channel> {
        let channel = self.channels.remove(&channel_id)?;
        if let Some(entry) = channel.guild_id.and_then(|g| self.guilds.get_mut(&g)) {
            entry.channels.remove(&channel_id);
        }
        self.messages.drop_channel(channel_id);
        Some(channel)
    }

    /// Filter `candidates` down to users nothing references any more
    fn unreferenced(&self, candidates: HashSet<Snowflake>) -> HashSet<Snowflake> {
        let mut remaining = candidates;

        if let Some(me) = &self.current_user {
            remaining.remove(&me.id);
        }
        remaining.retain(|id| !self.relationships.contains_key(id));
        if remaining.is_empty() {
            return remaining;
        }

        for channel in self.channels.values().filter(|c| c.is_private()) {
            for recipient in &channel.recipients {
                remaining.remove(recipient);
            }
        }
        for entry in self.guilds.values() {
            remaining.retain(|id| !entry.members.contains_key(id));
            if remaining.is_empty() {
                return remaining;
            }
        }
        remaining.retain(|id| !self.messages.is_author(*id));
        remaining
    }

    /// Evict whichever of `candidates` is no longer referenced; returns the evicted users
    pub(crate) fn evict_unreferenced(&mut self, candidates: HashSet<Snowflake>) -> Vec<User> {
        let doomed = self.unreferenced(candidates);
        let evicted: Vec<User> = doomed
            .into_iter()
            .filter_map(|id| self.users.remove(&id))
            .collect();
        if !evicted.is_empty() {
            trace!(count = evicted.len(), "Evicted unreferenced users");
        }
        evicted
    }

    /// Single-user form of `evict_unreferenced`
    pub(crate) fn evict_if_unreferenced(&mut self, user_id: Snowflake) -> Option<User> {
        self.evict_unreferenced(HashSet::from([user_id])).pop()
    }
}
