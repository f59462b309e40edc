//! The shared object cache
//!
//! All mutations take the write lock once, apply the whole change, and return the
//! before/after snapshots. Nothing in here awaits.

use std::collections::HashSet;

use chorus_core::{
    Channel, Emoji, Guild, Member, Message, Permissions, Presence, Reaction, ReactionEmoji,
    Relationship, RelationshipKind, Role, Snowflake, User, VoiceState,
};
use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::permissions::{base_permissions, channel_permissions};
use crate::state::{CacheState, GuildEntry};
use crate::upsert::{MessageLookup, Upserted};

/// Cache configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// Messages kept per channel
    pub max_messages: usize,
    /// User accounts must receive GUILD_SYNC before a guild counts as ready
    pub user_account: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_messages: 500,
            user_account: false,
        }
    }
}

/// Children of a guild delivered with GUILD_CREATE
#[derive(Debug, Clone, Default)]
pub struct GuildContents {
    pub channels: Vec<Channel>,
    pub roles: Vec<Role>,
    pub members: Vec<(User, Member)>,
}

/// Everything a guild removal took with it
#[derive(Debug, Clone)]
pub struct RemovedGuild {
    pub guild: Guild,
    pub channels: Vec<Channel>,
    pub roles: Vec<Role>,
    pub members: Vec<Member>,
    /// Users that were only referenced through this guild
    pub evicted_users: Vec<User>,
}

#[derive(Debug, Clone)]
pub struct RemovedMember {
    pub member: Member,
    /// Snapshot of the user at removal time
    pub user: Option<User>,
    /// The user had no other reference and was evicted
    pub evicted: bool,
}

#[derive(Debug, Clone)]
pub struct RemovedRelationship {
    pub relationship: Relationship,
    pub user: Option<User>,
    pub evicted: bool,
}

/// A presence applied to a cached member
#[derive(Debug, Clone)]
pub struct PresenceChange {
    pub member: Upserted<Member>,
    /// Set when the presence carried a full user object
    pub user: Option<Upserted<User>>,
}

/// Member streaming progress of one guild
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkProgress {
    pub guild_id: Snowflake,
    pub cached: usize,
    pub expected: u64,
    pub complete: bool,
    /// This chunk completed the guild
    pub newly_complete: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub guilds: usize,
    pub channels: usize,
    pub users: usize,
    pub members: usize,
    pub messages: usize,
    pub relationships: usize,
}

/// Keep presence and join date when an update does not carry them
fn merge_member(old: Option<&Member>, mut new: Member) -> Member {
    if let Some(old) = old {
        if new.presence == Presence::default() {
            new.presence = old.presence.clone();
        }
        if new.joined_at.is_none() {
            new.joined_at = old.joined_at;
        }
    }
    new
}

/// Shared object cache
pub struct Cache {
    config: CacheConfig,
    state: RwLock<CacheState>,
}

impl Cache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            state: RwLock::new(CacheState::new(config.max_messages)),
        }
    }

    pub fn config(&self) -> CacheConfig {
        self.config
    }

    // =========================================================================
    // Users
    // =========================================================================

    /// Store the logged-in user; it is never evicted
    pub fn set_current_user(&self, user: User) -> Upserted<User> {
        let mut state = self.state.write();
        state.current_user = Some(user.clone());
        let old = state.users.insert(user.id, user.clone());
        Upserted { old, new: user }
    }

    pub fn current_user(&self) -> Option<User> {
        self.state.read().current_user.clone()
    }

    pub fn upsert_user(&self, user: User) -> Upserted<User> {
        let old = self.state.write().put_user(user.clone());
        Upserted { old, new: user }
    }

    pub fn find_user(&self, user_id: Snowflake) -> Option<User> {
        self.state.read().users.get(&user_id).cloned()
    }

    /// Resolve the shared user behind a member
    ///
    /// `None` means the user was evicted while the member snapshot was held.
    pub fn member_user(&self, member: &Member) -> Option<User> {
        self.find_user(member.user_id)
    }

    // =========================================================================
    // Guilds
    // =========================================================================

    /// Insert or replace a guild together with its channels, roles, and members
    ///
    /// The given contents replace whatever was cached before. Members that
    /// disappeared are dropped and their users evicted if nothing else holds them.
    pub fn upsert_guild(&self, guild: Guild, contents: GuildContents) -> Upserted<Guild> {
        let mut guard = self.state.write();
        let state = &mut *guard;
        let guild_id = guild.id;

        let previous = state.guilds.remove(&guild_id);
        let mut entry = GuildEntry::new(guild);
        entry.guild.unavailable = false;
        entry.guild.chunked = false;
        entry.guild.synced = false;

        let fresh_channels: HashSet<Snowflake> = contents.channels.iter().map(|c| c.id).collect();
        let (old, stale_members) = match previous {
            Some(prev) => {
                for stale in prev.channels.difference(&fresh_channels) {
                    state.channels.remove(stale);
                    state.messages.drop_channel(*stale);
                }
                (Some(prev.guild), prev.members.into_keys().collect::<HashSet<_>>())
            }
            None => (None, HashSet::new()),
        };

        for mut channel in contents.channels {
            channel.guild_id = Some(guild_id);
            entry.channels.insert(channel.id);
            state.channels.insert(channel.id, channel);
        }
        for mut role in contents.roles {
            role.guild_id = guild_id;
            entry.roles.insert(role.id, role);
        }
        for (user, mut member) in contents.members {
            member.guild_id = guild_id;
            member.user_id = user.id;
            state.put_user(user);
            entry.members.insert(member.user_id, member);
        }
        entry.refresh_chunked();

        let departed: HashSet<Snowflake> = stale_members
            .into_iter()
            .filter(|id| !entry.members.contains_key(id))
            .collect();
        let new = entry.guild.clone();
        state.guilds.insert(guild_id, entry);
        state.evict_unreferenced(departed);

        trace!(guild_id = %guild_id, chunked = new.chunked, "Guild cached");
        Upserted { old, new }
    }

    /// Mutate guild-level fields in place (GUILD_UPDATE and friends)
    pub fn update_guild(
        &self,
        guild_id: Snowflake,
        f: impl FnOnce(&mut Guild),
    ) -> Option<Upserted<Guild>> {
        let mut state = self.state.write();
        let entry = state.guilds.get_mut(&guild_id)?;
        let old = entry.guild.clone();
        f(&mut entry.guild);
        entry.guild.id = guild_id;
        Some(Upserted::replaced(old, entry.guild.clone()))
    }

    pub fn replace_emojis(&self, guild_id: Snowflake, emojis: Vec<Emoji>) -> Option<Upserted<Guild>> {
        self.update_guild(guild_id, |guild| guild.emojis = emojis)
    }

    /// Remember a guild the gateway announced but has not streamed yet
    pub fn add_unavailable_guild(&self, guild_id: Snowflake, shard_id: u32) -> Guild {
        let mut state = self.state.write();
        let entry = state.guilds.entry(guild_id).or_insert_with(|| {
            let mut guild = Guild::unavailable(guild_id);
            guild.shard_id = shard_id;
            GuildEntry::new(guild)
        });
        entry.guild.unavailable = true;
        entry.guild.shard_id = shard_id;
        entry.guild.clone()
    }

    /// Outage: keep everything, flag the guild
    pub fn mark_guild_unavailable(&self, guild_id: Snowflake) -> Option<Guild> {
        let mut state = self.state.write();
        let entry = state.guilds.get_mut(&guild_id)?;
        entry.guild.unavailable = true;
        Some(entry.guild.clone())
    }

    /// Remove a guild and everything it owns
    pub fn remove_guild(&self, guild_id: Snowflake) -> Option<RemovedGuild> {
        let mut guard = self.state.write();
        let state = &mut *guard;
        let entry = state.guilds.remove(&guild_id)?;

        let channels: Vec<Channel> = entry
            .channels
            .iter()
            .filter_map(|id| {
                state.messages.drop_channel(*id);
                state.channels.remove(id)
            })
            .collect();
        let members: Vec<Member> = entry.members.into_values().collect();
        let evicted_users =
            state.evict_unreferenced(members.iter().map(|m| m.user_id).collect());

        debug!(
            guild_id = %guild_id,
            channels = channels.len(),
            members = members.len(),
            evicted = evicted_users.len(),
            "Guild removed from cache"
        );

        Some(RemovedGuild {
            guild: entry.guild,
            channels,
            roles: entry.roles.into_values().collect(),
            members,
            evicted_users,
        })
    }

    pub fn find_guild(&self, guild_id: Snowflake) -> Option<Guild> {
        self.state.read().guilds.get(&guild_id).map(|e| e.guild.clone())
    }

    pub fn guilds(&self) -> Vec<Guild> {
        self.state.read().guilds.values().map(|e| e.guild.clone()).collect()
    }

    pub fn guilds_for_shard(&self, shard_id: u32) -> Vec<Snowflake> {
        self.state
            .read()
            .guilds
            .values()
            .filter(|e| e.guild.shard_id == shard_id)
            .map(|e| e.guild.id)
            .collect()
    }

    // =========================================================================
    // Readiness
    // =========================================================================

    /// Every guild of the shard is available, chunked, and (for user accounts) synced
    pub fn shard_ready(&self, shard_id: u32) -> bool {
        let state = self.state.read();
        state
            .guilds
            .values()
            .filter(|e| e.guild.shard_id == shard_id)
            .all(|e| {
                !e.guild.unavailable
                    && e.guild.chunked
                    && (!self.config.user_account || e.guild.synced)
            })
    }

    /// Large guilds of the shard whose members have not all arrived
    pub fn unchunked_guilds(&self, shard_id: u32) -> Vec<Snowflake> {
        self.state
            .read()
            .guilds
            .values()
            .filter(|e| e.guild.shard_id == shard_id && !e.guild.unavailable && !e.guild.chunked)
            .map(|e| e.guild.id)
            .collect()
    }

    /// Forget readiness of a shard's guilds after its session was discarded
    ///
    /// Cached data stays; the guilds are re-streamed by the next READY.
    pub fn reset_shard(&self, shard_id: u32) -> usize {
        let mut state = self.state.write();
        let mut reset = 0;
        for entry in state.guilds.values_mut().filter(|e| e.guild.shard_id == shard_id) {
            entry.guild.unavailable = true;
            entry.guild.synced = false;
            reset += 1;
        }
        debug!(shard_id, guilds = reset, "Shard readiness reset");
        reset
    }

    /// Add streamed members; completes the guild when the advertised count is
    /// reached or the gateway marks the chunk as the last one
    pub fn apply_member_chunk(
        &self,
        guild_id: Snowflake,
        members: Vec<(User, Member)>,
        chunk_index: Option<u32>,
        chunk_count: Option<u32>,
    ) -> Option<ChunkProgress> {
        let mut guard = self.state.write();
        let state = &mut *guard;
        if !state.guilds.contains_key(&guild_id) {
            return None;
        }

        let mut incoming = Vec::with_capacity(members.len());
        for (user, mut member) in members {
            member.guild_id = guild_id;
            member.user_id = user.id;
            state.put_user(user);
            incoming.push(member);
        }

        let entry = state.guilds.get_mut(&guild_id)?;
        for member in incoming {
            let merged = merge_member(entry.members.get(&member.user_id), member);
            entry.members.insert(merged.user_id, merged);
        }

        let was_complete = entry.guild.chunked;
        entry.refresh_chunked();
        let last_chunk = matches!(
            (chunk_index, chunk_count),
            (Some(i), Some(n)) if i.saturating_add(1) >= n
        );
        if last_chunk {
            entry.guild.chunked = true;
        }

        let progress = ChunkProgress {
            guild_id,
            cached: entry.members.len(),
            expected: entry.guild.member_count,
            complete: entry.guild.chunked,
            newly_complete: !was_complete && entry.guild.chunked,
        };
        if progress.newly_complete {
            debug!(guild_id = %guild_id, members = progress.cached, "Guild fully chunked");
        }
        Some(progress)
    }

    /// Apply a GUILD_SYNC: members and presences for user accounts
    pub fn apply_guild_sync(
        &self,
        guild_id: Snowflake,
        large: bool,
        members: Vec<(User, Member)>,
    ) -> Option<Guild> {
        let mut guard = self.state.write();
        let state = &mut *guard;
        if !state.guilds.contains_key(&guild_id) {
            return None;
        }

        let mut incoming = Vec::with_capacity(members.len());
        for (user, mut member) in members {
            member.guild_id = guild_id;
            member.user_id = user.id;
            state.put_user(user);
            incoming.push(member);
        }

        let entry = state.guilds.get_mut(&guild_id)?;
        for member in incoming {
            let merged = merge_member(entry.members.get(&member.user_id), member);
            entry.members.insert(merged.user_id, merged);
        }
        entry.guild.large = large;
        entry.guild.synced = true;
        entry.refresh_chunked();
        Some(entry.guild.clone())
    }

    // =========================================================================
    // Channels
    // =========================================================================

    /// Insert or replace a channel
    ///
    /// Guild channels need their guild cached. `recipients` are only used for private
    /// channels; an empty list keeps the recipients already known.
    pub fn upsert_channel(&self, mut channel: Channel, recipients: Vec<User>) -> Option<Upserted<Channel>> {
        let mut guard = self.state.write();
        let state = &mut *guard;

        match channel.guild_id {
            Some(guild_id) => {
                let entry = state.guilds.get_mut(&guild_id)?;
                entry.channels.insert(channel.id);
            }
            None => {
                if recipients.is_empty() {
                    if let Some(existing) = state.channels.get(&channel.id) {
                        channel.recipients.clone_from(&existing.recipients);
                    }
                } else {
                    channel.recipients = recipients.iter().map(|u| u.id).collect();
                    for user in recipients {
                        state.put_user(user);
                    }
                }
            }
        }

        let old = state.channels.insert(channel.id, channel.clone());
        Some(Upserted { old, new: channel })
    }

    pub fn remove_channel(&self, channel_id: Snowflake) -> Option<Channel> {
        self.state.write().drop_channel(channel_id)
    }

    /// A user joined a group channel
    pub fn add_recipient(&self, channel_id: Snowflake, user: User) -> Option<Channel> {
        let mut guard = self.state.write();
        let state = &mut *guard;
        let channel = state.channels.get_mut(&channel_id)?;
        if !channel.recipients.contains(&user.id) {
            channel.recipients.push(user.id);
        }
        let snapshot = channel.clone();
        state.put_user(user);
        Some(snapshot)
    }

    /// A user left a group channel; returns the channel and the user snapshot
    pub fn remove_recipient(&self, channel_id: Snowflake, user_id: Snowflake) -> Option<(Channel, Option<User>)> {
        let mut guard = self.state.write();
        let state = &mut *guard;
        let channel = state.channels.get_mut(&channel_id)?;
        channel.recipients.retain(|id| *id != user_id);
        Some((channel.clone(), state.users.get(&user_id).cloned()))
    }

    pub fn find_channel(&self, channel_id: Snowflake) -> Option<Channel> {
        self.state.read().channels.get(&channel_id).cloned()
    }

    pub fn guild_channels(&self, guild_id: Snowflake) -> Vec<Channel> {
        let state = self.state.read();
        let Some(entry) = state.guilds.get(&guild_id) else {
            return Vec::new();
        };
        let mut channels: Vec<Channel> = entry
            .channels
            .iter()
            .filter_map(|id| state.channels.get(id).cloned())
            .collect();
        channels.sort_by_key(|c| (c.position, c.id));
        channels
    }

    pub fn private_channels(&self) -> Vec<Channel> {
        self.state
            .read()
            .channels
            .values()
            .filter(|c| c.is_private())
            .cloned()
            .collect()
    }

    // =========================================================================
    // Roles
    // =========================================================================

    pub fn upsert_role(&self, guild_id: Snowflake, mut role: Role) -> Option<Upserted<Role>> {
        let mut state = self.state.write();
        let entry = state.guilds.get_mut(&guild_id)?;
        role.guild_id = guild_id;
        let old = entry.roles.insert(role.id, role.clone());
        Some(Upserted { old, new: role })
    }

    /// Remove a role and strip it from every member holding it
    pub fn remove_role(&self, guild_id: Snowflake, role_id: Snowflake) -> Option<Role> {
        let mut state = self.state.write();
        let entry = state.guilds.get_mut(&guild_id)?;
        let role = entry.roles.remove(&role_id)?;
        for member in entry.members.values_mut() {
            member.remove_role(role_id);
        }
        Some(role)
    }

    pub fn find_role(&self, guild_id: Snowflake, role_id: Snowflake) -> Option<Role> {
        self.state
            .read()
            .guilds
            .get(&guild_id)?
            .roles
            .get(&role_id)
            .cloned()
    }

    /// Roles of a guild, lowest position first
    pub fn guild_roles(&self, guild_id: Snowflake) -> Vec<Role> {
        let state = self.state.read();
        let mut roles: Vec<Role> = state
            .guilds
            .get(&guild_id)
            .map(|e| e.roles.values().cloned().collect())
            .unwrap_or_default();
        roles.sort_by_key(|r| (r.position, std::cmp::Reverse(r.id)));
        roles
    }

    // =========================================================================
    // Members
    // =========================================================================

    /// Insert or replace a member and its user
    ///
    /// A member without presence data keeps the presence already cached.
    pub fn upsert_member(&self, user: User, member: Member) -> Option<Upserted<Member>> {
        self.put_member(user, member, false)
    }

    /// Like `upsert_member`, counting a new member towards the guild's member count
    pub fn add_member(&self, user: User, member: Member) -> Option<Upserted<Member>> {
        self.put_member(user, member, true)
    }

    fn put_member(&self, user: User, mut member: Member, joined: bool) -> Option<Upserted<Member>> {
        let mut guard = self.state.write();
        let state = &mut *guard;
        if !state.guilds.contains_key(&member.guild_id) {
            return None;
        }

        member.user_id = user.id;
        state.put_user(user);

        let entry = state.guilds.get_mut(&member.guild_id)?;
        let old = entry.members.get(&member.user_id).cloned();
        let new = merge_member(old.as_ref(), member);
        entry.members.insert(new.user_id, new.clone());
        if joined && old.is_none() {
            entry.guild.member_count += 1;
        }
        Some(Upserted { old, new })
    }

    /// Remove a member; evicts its user if nothing else references it
    pub fn remove_member(&self, guild_id: Snowflake, user_id: Snowflake) -> Option<RemovedMember> {
        let mut guard = self.state.write();
        let state = &mut *guard;
        let entry = state.guilds.get_mut(&guild_id)?;
        let member = entry.members.remove(&user_id)?;
        entry.guild.member_count = entry.guild.member_count.saturating_sub(1);

        let user = state.users.get(&user_id).cloned();
        let evicted = state.evict_if_unreferenced(user_id).is_some();
        Some(RemovedMember {
            member,
            user,
            evicted,
        })
    }

    /// Update the presence of a cached member; uncached members are ignored
    pub fn touch_presence(
        &self,
        guild_id: Snowflake,
        user_id: Snowflake,
        presence: Presence,
        user: Option<User>,
    ) -> Option<PresenceChange> {
        let mut guard = self.state.write();
        let state = &mut *guard;
        let entry = state.guilds.get_mut(&guild_id)?;
        let member = entry.members.get_mut(&user_id)?;
        let old = member.clone();
        member.presence = presence;
        let member = Upserted::replaced(old, member.clone());

        let user = user.filter(|u| u.id == user_id).map(|u| {
            let old = state.put_user(u.clone());
            Upserted { old, new: u }
        });
        Some(PresenceChange { member, user })
    }

    pub fn find_member(&self, guild_id: Snowflake, user_id: Snowflake) -> Option<Member> {
        self.state
            .read()
            .guilds
            .get(&guild_id)?
            .members
            .get(&user_id)
            .cloned()
    }

    /// Member and its user, resolved under one read lock
    pub fn find_member_with_user(&self, guild_id: Snowflake, user_id: Snowflake) -> Option<(Member, User)> {
        let state = self.state.read();
        let member = state.guilds.get(&guild_id)?.members.get(&user_id)?.clone();
        let user = state.users.get(&user_id)?.clone();
        Some((member, user))
    }

    pub fn guild_members(&self, guild_id: Snowflake) -> Vec<Member> {
        self.state
            .read()
            .guilds
            .get(&guild_id)
            .map(|e| e.members.values().cloned().collect())
            .unwrap_or_default()
    }

    // =========================================================================
    // Voice
    // =========================================================================

    /// Store a guild voice state; a state without channel removes the entry
    pub fn set_voice_state(&self, voice: VoiceState) -> Option<Upserted<VoiceState>> {
        let mut state = self.state.write();
        let entry = state.guilds.get_mut(&voice.guild_id?)?;
        let old = if voice.is_connected() {
            entry.guild.voice_states.insert(voice.user_id, voice.clone())
        } else {
            entry.guild.voice_states.remove(&voice.user_id)
        };
        if let Some(member) = entry.members.get_mut(&voice.user_id) {
            member.deaf = voice.deaf;
            member.mute = voice.mute;
        }
        Some(Upserted { old, new: voice })
    }

    pub fn find_voice_state(&self, guild_id: Snowflake, user_id: Snowflake) -> Option<VoiceState> {
        self.state
            .read()
            .guilds
            .get(&guild_id)?
            .guild
            .voice_states
            .get(&user_id)
            .cloned()
    }

    // =========================================================================
    // Messages
    // =========================================================================

    /// Buffer a message, returning the one it pushed out (if any)
    pub fn record_message(&self, message: Message, author: Option<User>) -> Option<Message> {
        let mut state = self.state.write();
        if let Some(author) = author {
            state.put_user(author);
        }
        let evicted = state.messages.push(message);
        if let Some(evicted) = &evicted {
            trace!(message_id = %evicted.id, channel_id = %evicted.channel_id, "Message evicted");
        }
        evicted
    }

    /// Patch a buffered message; `None` when it is not cached
    pub fn update_message(
        &self,
        channel_id: Snowflake,
        message_id: Snowflake,
        f: impl FnOnce(&mut Message),
    ) -> Option<Upserted<Message>> {
        let mut state = self.state.write();
        let (old, new) = state.messages.update(channel_id, message_id, f)?;
        Some(Upserted::replaced(old, new))
    }

    pub fn forget_message(&self, channel_id: Snowflake, message_id: Snowflake) -> MessageLookup {
        self.state.write().messages.remove(channel_id, message_id).into()
    }

    /// Remove several messages at once; uncached ids are skipped
    pub fn forget_messages(&self, channel_id: Snowflake, message_ids: &[Snowflake]) -> Vec<Message> {
        let mut state = self.state.write();
        message_ids
            .iter()
            .filter_map(|id| state.messages.remove(channel_id, *id))
            .collect()
    }

    pub fn find_message(&self, channel_id: Snowflake, message_id: Snowflake) -> MessageLookup {
        self.state.read().messages.get(channel_id, message_id).cloned().into()
    }

    /// Buffered messages of a channel, oldest first
    pub fn channel_messages(&self, channel_id: Snowflake) -> Vec<Message> {
        self.state.read().messages.channel(channel_id)
    }

    /// Count a reaction; `None` when the message is not cached
    pub fn add_reaction(
        &self,
        channel_id: Snowflake,
        message_id: Snowflake,
        emoji: &ReactionEmoji,
        user_id: Snowflake,
    ) -> Option<(Message, Reaction)> {
        let mut guard = self.state.write();
        let state = &mut *guard;
        let me = state.current_user.as_ref().is_some_and(|u| u.id == user_id);
        let message = state.messages.get_mut(channel_id, message_id)?;
        let reaction = message.add_reaction(emoji, me);
        Some((message.clone(), reaction))
    }

    /// Uncount a reaction
    ///
    /// Outer `None`: message not cached. Inner `None`: no such reaction on it.
    pub fn remove_reaction(
        &self,
        channel_id: Snowflake,
        message_id: Snowflake,
        emoji: &ReactionEmoji,
        user_id: Snowflake,
    ) -> Option<(Message, Option<Reaction>)> {
        let mut guard = self.state.write();
        let state = &mut *guard;
        let me = state.current_user.as_ref().is_some_and(|u| u.id == user_id);
        let message = state.messages.get_mut(channel_id, message_id)?;
        let reaction = message.remove_reaction(emoji, me);
        Some((message.clone(), reaction))
    }

    pub fn clear_reactions(&self, channel_id: Snowflake, message_id: Snowflake) -> Option<(Message, Vec<Reaction>)> {
        let mut state = self.state.write();
        let message = state.messages.get_mut(channel_id, message_id)?;
        let removed = message.clear_reactions();
        Some((message.clone(), removed))
    }

    /// Find a custom emoji in any cached guild
    pub fn find_emoji(&self, emoji_id: Snowflake) -> Option<Emoji> {
        self.state
            .read()
            .guilds
            .values()
            .find_map(|e| e.guild.emoji(emoji_id).cloned())
    }

    // =========================================================================
    // Relationships
    // =========================================================================

    pub fn add_relationship(&self, user: User, kind: RelationshipKind) -> Upserted<Relationship> {
        let mut state = self.state.write();
        let user_id = user.id;
        state.put_user(user);

        let mut relationship = Relationship::new(user_id, kind);
        let old = state.relationships.get(&user_id).cloned();
        if let Some(old) = &old {
            relationship.presence = old.presence.clone();
        }
        state.relationships.insert(user_id, relationship.clone());
        Upserted {
            old,
            new: relationship,
        }
    }

    /// Remove a relationship; evicts its user if nothing else references it
    pub fn remove_relationship(&self, user_id: Snowflake) -> Option<RemovedRelationship> {
        let mut state = self.state.write();
        let relationship = state.relationships.remove(&user_id)?;
        let user = state.users.get(&user_id).cloned();
        let evicted = state.evict_if_unreferenced(user_id).is_some();
        Some(RemovedRelationship {
            relationship,
            user,
            evicted,
        })
    }

    /// Presence of a friend (presence updates without a guild)
    pub fn touch_relationship_presence(
        &self,
        user_id: Snowflake,
        presence: Presence,
        user: Option<User>,
    ) -> Option<Upserted<Relationship>> {
        let mut guard = self.state.write();
        let state = &mut *guard;
        let relationship = state.relationships.get_mut(&user_id)?;
        let old = relationship.clone();
        relationship.presence = presence;
        let new = relationship.clone();
        if let Some(user) = user.filter(|u| u.id == user_id) {
            state.put_user(user);
        }
        Some(Upserted::replaced(old, new))
    }

    pub fn find_relationship(&self, user_id: Snowflake) -> Option<Relationship> {
        self.state.read().relationships.get(&user_id).cloned()
    }

    pub fn relationships(&self) -> Vec<Relationship> {
        self.state.read().relationships.values().cloned().collect()
    }

    // =========================================================================
    // Permissions
    // =========================================================================

    /// Guild-level permissions of a cached member
    pub fn permissions_for(&self, guild_id: Snowflake, user_id: Snowflake) -> Option<Permissions> {
        let state = self.state.read();
        let entry = state.guilds.get(&guild_id)?;
        let member = entry.members.get(&user_id)?;
        Some(base_permissions(&entry.guild, member, entry.roles.values()))
    }

    /// Permissions of a cached member in a channel, overwrites applied
    ///
    /// Private channels grant the usual text permissions to everyone in them.
    pub fn channel_permissions_for(&self, channel_id: Snowflake, user_id: Snowflake) -> Option<Permissions> {
        let state = self.state.read();
        let channel = state.channels.get(&channel_id)?;
        let Some(guild_id) = channel.guild_id else {
            return Some(
                Permissions::VIEW_CHANNEL
                    | Permissions::SEND_MESSAGES
                    | Permissions::READ_MESSAGE_HISTORY
                    | Permissions::ADD_REACTIONS
                    | Permissions::EMBED_LINKS
                    | Permissions::ATTACH_FILES,
            );
        };
        let entry = state.guilds.get(&guild_id)?;
        let member = entry.members.get(&user_id)?;
        let base = base_permissions(&entry.guild, member, entry.roles.values());
        Some(channel_permissions(base, &entry.guild, channel, member))
    }

    // =========================================================================
    // Stats
    // =========================================================================

    pub fn stats(&self) -> CacheStats {
        let state = self.state.read();
        CacheStats {
            guilds: state.guilds.len(),
            channels: state.channels.len(),
            users: state.users.len(),
            members: state.guilds.values().map(|e| e.members.len()).sum(),
            messages: state.messages.len(),
            relationships: state.relationships.len(),
        }
    }
}

impl Default for Cache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}
