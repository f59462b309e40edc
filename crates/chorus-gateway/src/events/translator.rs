//! Dispatch translation
//!
//! Applies each raw dispatch to the cache and derives the domain events that follow
//! from it. A translator belongs to one shard and also tracks that shard's streaming
//! phase: queued member chunk requests, guild sync, and per-shard readiness.

use std::collections::HashSet;
use std::sync::Arc;

use chorus_cache::{Cache, MessageLookup, Upserted};
use chorus_core::{Snowflake, User, VoiceState};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, trace};

use super::payloads::{
    merge_guild_update, BulkDeletePayload, ChannelPayload, EmojisPayload, GuildDeletePayload,
    GuildPayload, GuildSyncPayload, GuildUserPayload, MemberChunkPayload, MemberPayload,
    MemberUpdatePayload, MessageDeletePayload, MessagePatch, MessagePayload, PresencePayload,
    ReactionClearPayload, ReactionPayload, ReadyPayload, RecipientPayload, RelationshipPayload,
    RelationshipRemovePayload, RoleDeletePayload, RolePayload, TypingPayload,
};
use super::Event;
use crate::protocol::{GatewayMessage, RequestMembersPayload};
use crate::shard::Dispatch;

/// Shard transitions the translator turns into events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lifecycle {
    Resumed {
        replayed: u64,
    },
    Disconnected {
        code: Option<u16>,
        reason: String,
        will_resume: bool,
    },
    /// The session was discarded; its guilds are streamed again
    Invalidated,
    Failed {
        reason: String,
    },
}

/// Result of one dispatch
#[derive(Debug, Default)]
pub struct Translation {
    pub events: Vec<Event>,
    /// Requests to send on the shard's connection (member chunks, guild sync)
    pub outbound: Vec<GatewayMessage>,
}

/// Aggregates per-shard readiness into a single "all shards ready"
#[derive(Debug)]
pub struct ReadyTracker {
    shard_count: u32,
    ready: Mutex<HashSet<u32>>,
}

impl ReadyTracker {
    #[must_use]
    pub fn new(shard_count: u32) -> Self {
        Self {
            shard_count,
            ready: Mutex::new(HashSet::new()),
        }
    }

    pub fn shard_count(&self) -> u32 {
        self.shard_count
    }

    /// Mark a shard ready; `true` when this completed the set
    pub fn mark_ready(&self, shard_id: u32) -> bool {
        let mut ready = self.ready.lock();
        let inserted = ready.insert(shard_id);
        inserted && ready.len() == self.shard_count as usize
    }

    pub fn unmark(&self, shard_id: u32) {
        self.ready.lock().remove(&shard_id);
    }

    pub fn all_ready(&self) -> bool {
        self.ready.lock().len() == self.shard_count as usize
    }
}

/// Per-shard dispatch translator
pub struct Translator {
    shard_id: u32,
    cache: Arc<Cache>,
    readiness: Arc<ReadyTracker>,
    user_account: bool,
    /// Per-shard ready already fired for this session
    ready_fired: bool,
    sync_sent: bool,
    chunk_queue: Vec<Snowflake>,
}

impl Translator {
    #[must_use]
    pub fn new(shard_id: u32, cache: Arc<Cache>, readiness: Arc<ReadyTracker>) -> Self {
        let user_account = cache.config().user_account;
        Self {
            shard_id,
            cache,
            readiness,
            user_account,
            ready_fired: false,
            sync_sent: false,
            chunk_queue: Vec::new(),
        }
    }

    pub fn shard_id(&self) -> u32 {
        self.shard_id
    }

    /// Whether the shard is still streaming its initial guilds
    pub fn is_streaming(&self) -> bool {
        !self.ready_fired
    }

    /// Events for a shard state transition
    pub fn lifecycle(&mut self, transition: Lifecycle) -> Vec<Event> {
        let shard_id = self.shard_id;
        match transition {
            Lifecycle::Resumed { replayed } => vec![Event::Resumed { shard_id, replayed }],
            Lifecycle::Disconnected {
                code,
                reason,
                will_resume,
            } => vec![Event::Disconnect {
                shard_id,
                code,
                reason,
                will_resume,
            }],
            Lifecycle::Invalidated => {
                self.restart_streaming();
                self.cache.reset_shard(shard_id);
                self.readiness.unmark(shard_id);
                Vec::new()
            }
            Lifecycle::Failed { reason } => {
                self.readiness.unmark(shard_id);
                vec![Event::ShardFailed { shard_id, reason }]
            }
        }
    }

    /// Apply a dispatch to the cache and derive its events
    ///
    /// # Errors
    /// Returns an error if the payload does not have the expected shape. Nothing has
    /// been applied to the cache in that case.
    pub fn translate(&mut self, dispatch: &Dispatch) -> Result<Translation, serde_json::Error> {
        let mut out = Translation::default();
        let data = &dispatch.data;

        match dispatch.name.as_str() {
            "READY" => self.on_ready(parse(data)?, &mut out),
            // the session reports RESUMED as a lifecycle transition
            "RESUMED" => {}
            "GUILD_CREATE" => self.on_guild_create(parse(data)?, &mut out),
            "GUILD_UPDATE" => self.on_guild_update(parse(data)?, &mut out),
            "GUILD_DELETE" => self.on_guild_delete(&parse(data)?, &mut out),
            "GUILD_MEMBERS_CHUNK" => self.on_member_chunk(parse(data)?, &mut out),
            "GUILD_SYNC" => self.on_guild_sync(parse(data)?, &mut out),
            "GUILD_MEMBER_ADD" => self.on_member_add(parse(data)?, &mut out),
            "GUILD_MEMBER_UPDATE" => self.on_member_update(parse(data)?, &mut out),
            "GUILD_MEMBER_REMOVE" => self.on_member_remove(&parse(data)?, &mut out),
            "GUILD_BAN_ADD" => self.on_ban_add(parse(data)?, &mut out),
            "GUILD_BAN_REMOVE" => self.on_ban_remove(parse(data)?, &mut out),
            "GUILD_ROLE_CREATE" | "GUILD_ROLE_UPDATE" => self.on_role(parse(data)?, &mut out),
            "GUILD_ROLE_DELETE" => self.on_role_delete(&parse(data)?, &mut out),
            "GUILD_EMOJIS_UPDATE" => self.on_emojis(parse(data)?, &mut out),
            "CHANNEL_CREATE" | "CHANNEL_UPDATE" => self.on_channel(parse(data)?, &mut out),
            "CHANNEL_DELETE" => self.on_channel_delete(&parse(data)?, &mut out),
            "CHANNEL_RECIPIENT_ADD" => self.on_recipient_add(parse(data)?, &mut out),
            "CHANNEL_RECIPIENT_REMOVE" => self.on_recipient_remove(&parse(data)?, &mut out),
            "MESSAGE_CREATE" => self.on_message_create(parse(data)?, &mut out),
            "MESSAGE_UPDATE" => self.on_message_update(&parse(data)?, data, &mut out),
            "MESSAGE_DELETE" => self.on_message_delete(&parse(data)?, &mut out),
            "MESSAGE_DELETE_BULK" => self.on_message_delete_bulk(&parse(data)?, &mut out),
            "MESSAGE_REACTION_ADD" => self.on_reaction_add(parse(data)?, &mut out),
            "MESSAGE_REACTION_REMOVE" => self.on_reaction_remove(parse(data)?, &mut out),
            "MESSAGE_REACTION_REMOVE_ALL" => self.on_reaction_clear(&parse(data)?, &mut out),
            "PRESENCE_UPDATE" => self.on_presence(&parse(data)?, &mut out),
            "TYPING_START" => self.on_typing(&parse(data)?, &mut out),
            "USER_UPDATE" => self.on_user_update(parse(data)?, &mut out),
            "VOICE_STATE_UPDATE" => self.on_voice_state(parse(data)?, &mut out),
            "RELATIONSHIP_ADD" => self.on_relationship_add(parse(data)?, &mut out),
            "RELATIONSHIP_REMOVE" => self.on_relationship_remove(&parse(data)?, &mut out),
            other => trace!(shard_id = self.shard_id, event = %other, "Unhandled dispatch"),
        }

        Ok(out)
    }

    // =========================================================================
    // Session and streaming
    // =========================================================================

    fn restart_streaming(&mut self) {
        self.ready_fired = false;
        self.sync_sent = false;
        self.chunk_queue.clear();
    }

    fn on_ready(&mut self, ready: ReadyPayload, out: &mut Translation) {
        self.restart_streaming();
        self.readiness.unmark(self.shard_id);
        self.cache.set_current_user(ready.user);

        debug!(
            shard_id = self.shard_id,
            session_id = %ready.session_id,
            guilds = ready.guilds.len(),
            "READY received"
        );

        for payload in ready.guilds {
            if payload.guild.unavailable {
                self.cache.add_unavailable_guild(payload.guild.id, self.shard_id);
            } else {
                let (guild, contents) = payload.into_parts(self.shard_id);
                let cached = self.cache.upsert_guild(guild, contents).new;
                if cached.large && !cached.chunked {
                    self.queue_chunk(cached.id, out);
                }
            }
        }

        for channel in ready.private_channels {
            self.cache.upsert_channel(channel.channel, channel.recipients);
        }
        for relationship in ready.relationships {
            self.cache.add_relationship(relationship.user, relationship.kind);
        }
        for presence in &ready.presences {
            self.cache.touch_relationship_presence(
                presence.user.id,
                presence.presence(),
                presence.user.complete(),
            );
        }

        out.events.push(Event::Connect {
            shard_id: self.shard_id,
        });
        self.check_ready(out);
    }

    fn queue_chunk(&mut self, guild_id: Snowflake, out: &mut Translation) {
        if !self.chunk_queue.contains(&guild_id) {
            self.chunk_queue.push(guild_id);
        }
        if self.chunk_queue.len() >= RequestMembersPayload::MAX_GUILDS {
            self.flush_chunks(out);
        }
    }

    fn flush_chunks(&mut self, out: &mut Translation) {
        if self.chunk_queue.is_empty() {
            return;
        }
        let guild_ids = std::mem::take(&mut self.chunk_queue);
        debug!(shard_id = self.shard_id, guilds = guild_ids.len(), "Requesting member chunks");
        out.outbound
            .push(GatewayMessage::request_members(&RequestMembersPayload::all(guild_ids)));
    }

    /// Flush pending requests once every guild streamed in, and fire readiness
    fn check_ready(&mut self, out: &mut Translation) {
        if self.ready_fired {
            return;
        }

        let guild_ids = self.cache.guilds_for_shard(self.shard_id);
        let all_available = guild_ids.iter().all(|id| {
            self.cache
                .find_guild(*id)
                .is_some_and(|guild| !guild.unavailable)
        });
        if !all_available {
            return;
        }

        self.flush_chunks(out);
        if self.user_account && !self.sync_sent && !guild_ids.is_empty() {
            self.sync_sent = true;
            out.outbound.push(GatewayMessage::guild_sync(&guild_ids));
        }

        if self.cache.shard_ready(self.shard_id) {
            self.ready_fired = true;
            debug!(shard_id = self.shard_id, guilds = guild_ids.len(), "Shard ready");
            out.events.push(Event::Ready {
                shard_id: self.shard_id,
            });
            if self.readiness.mark_ready(self.shard_id) {
                out.events.push(Event::ShardsReady {
                    shard_count: self.readiness.shard_count(),
                });
            }
        }
    }

    // =========================================================================
    // Guilds
    // =========================================================================

    fn on_guild_create(&mut self, payload: GuildPayload, out: &mut Translation) {
        if payload.guild.unavailable {
            self.cache.add_unavailable_guild(payload.guild.id, self.shard_id);
            return;
        }

        let (guild, contents) = payload.into_parts(self.shard_id);
        let upserted = self.cache.upsert_guild(guild, contents);
        let guild = upserted.new;
        let needs_chunks = guild.large && !guild.chunked;

        if self.is_streaming() {
            if needs_chunks {
                self.queue_chunk(guild.id, out);
            }
            out.events.push(Event::GuildStreamed(guild));
            self.check_ready(out);
            return;
        }

        if needs_chunks {
            out.outbound
                .push(GatewayMessage::request_members(&RequestMembersPayload::all(vec![guild.id])));
        }
        if self.user_account {
            out.outbound.push(GatewayMessage::guild_sync(&[guild.id]));
        }
        if upserted.old.is_some() {
            out.events.push(Event::GuildAvailable(guild));
        } else {
            out.events.push(Event::GuildJoin(guild));
        }
    }

    fn on_guild_update(&mut self, payload: GuildPayload, out: &mut Translation) {
        let guild_id = payload.guild.id;
        if self.cache.find_guild(guild_id).is_none() {
            self.on_guild_create(payload, out);
            return;
        }

        for role in payload.roles {
            self.cache.upsert_role(guild_id, role);
        }
        let update = payload.guild;
        if let Some(Upserted { old: Some(old), new }) = self
            .cache
            .update_guild(guild_id, |cached| merge_guild_update(cached, update))
        {
            out.events.push(Event::GuildUpdate { old, new });
        }
    }

    fn on_guild_delete(&mut self, payload: &GuildDeletePayload, out: &mut Translation) {
        if payload.unavailable {
            if let Some(guild) = self.cache.mark_guild_unavailable(payload.id) {
                out.events.push(Event::GuildUnavailable(guild));
            }
        } else if let Some(removed) = self.cache.remove_guild(payload.id) {
            out.events.push(Event::GuildLeave(removed.guild));
        }
        // a guild that left during streaming no longer holds readiness back
        self.check_ready(out);
    }

    fn on_member_chunk(&mut self, payload: MemberChunkPayload, out: &mut Translation) {
        let guild_id = payload.guild_id;
        let count = payload.members.len();
        let members = payload
            .members
            .into_iter()
            .map(|m| m.into_parts(guild_id))
            .collect();

        let Some(progress) =
            self.cache
                .apply_member_chunk(guild_id, members, payload.chunk_index, payload.chunk_count)
        else {
            return;
        };

        if let Some(guild) = self.cache.find_guild(guild_id) {
            out.events.push(Event::GuildChunk {
                guild: guild.clone(),
                members: count,
                complete: progress.complete,
            });
            if progress.newly_complete {
                out.events.push(Event::GuildAvailable(guild));
            }
        }
        if progress.newly_complete {
            self.check_ready(out);
        }
    }

    fn on_guild_sync(&mut self, payload: GuildSyncPayload, out: &mut Translation) {
        let guild_id = payload.id;
        let count = payload.members.len();
        let presences: std::collections::HashMap<_, _> = payload
            .presences
            .iter()
            .map(|p| (p.user.id, p.presence()))
            .collect();
        let members = payload
            .members
            .into_iter()
            .map(|m| {
                let (user, mut member) = m.into_parts(guild_id);
                if let Some(presence) = presences.get(&user.id) {
                    member.presence = presence.clone();
                }
                (user, member)
            })
            .collect();

        if let Some(guild) = self.cache.apply_guild_sync(guild_id, payload.large, members) {
            out.events.push(Event::GuildSync {
                guild,
                members: count,
            });
            self.check_ready(out);
        }
    }

    fn on_emojis(&mut self, payload: EmojisPayload, out: &mut Translation) {
        if let Some(Upserted { old: Some(old), new }) =
            self.cache.replace_emojis(payload.guild_id, payload.emojis)
        {
            out.events.push(Event::GuildEmojisUpdate { old, new });
        }
    }

    // =========================================================================
    // Members
    // =========================================================================

    fn on_member_add(&mut self, payload: MemberPayload, out: &mut Translation) {
        let Some(guild_id) = payload.guild_id else {
            return;
        };
        let (user, member) = payload.into_parts(guild_id);
        if let Some(upserted) = self.cache.add_member(user.clone(), member) {
            out.events.push(Event::MemberJoin {
                member: upserted.new,
                user,
            });
        }
    }

    fn on_member_update(&mut self, payload: MemberUpdatePayload, out: &mut Translation) {
        let Some(mut member) = self.cache.find_member(payload.guild_id, payload.user.id) else {
            return;
        };
        member.roles = payload.roles;
        member.nick = payload.nick;

        let user = payload.user;
        if let Some(Upserted { old: Some(old), new }) = self.cache.upsert_member(user.clone(), member)
        {
            out.events.push(Event::MemberUpdate {
                old,
                new,
                user: Some(user),
            });
        }
    }

    fn on_member_remove(&mut self, payload: &GuildUserPayload, out: &mut Translation) {
        if let Some(removed) = self.cache.remove_member(payload.guild_id, payload.user.id) {
            out.events.push(Event::MemberLeave {
                member: removed.member,
                user: removed.user,
            });
        }
    }

    fn on_ban_add(&mut self, payload: GuildUserPayload, out: &mut Translation) {
        let Some(guild) = self.cache.find_guild(payload.guild_id) else {
            return;
        };
        match self.cache.find_member(guild.id, payload.user.id) {
            Some(member) => out.events.push(Event::MemberBan {
                guild,
                member,
                user: payload.user,
            }),
            None => out.events.push(Event::UserBan {
                guild,
                user: payload.user,
            }),
        }
    }

    fn on_ban_remove(&mut self, payload: GuildUserPayload, out: &mut Translation) {
        if let Some(guild) = self.cache.find_guild(payload.guild_id) {
            out.events.push(Event::UserUnban {
                guild,
                user: payload.user,
            });
        }
    }

    fn on_presence(&mut self, payload: &PresencePayload, out: &mut Translation) {
        let user_id = payload.user.id;
        let presence = payload.presence();
        let user = payload.user.complete();

        match payload.guild_id {
            Some(guild_id) => {
                let Some(change) = self.cache.touch_presence(guild_id, user_id, presence, user)
                else {
                    trace!(guild_id = %guild_id, user_id = %user_id, "Presence for uncached member ignored");
                    return;
                };
                let Upserted { old, new } = change.member;
                let user = change
                    .user
                    .map(|u| u.new)
                    .or_else(|| self.cache.find_user(user_id));
                out.events.push(Event::MemberUpdate {
                    old: old.unwrap_or_else(|| new.clone()),
                    new,
                    user,
                });
            }
            None => {
                if let Some(Upserted { old, new }) =
                    self.cache.touch_relationship_presence(user_id, presence, user)
                {
                    out.events.push(Event::FriendUpdate {
                        old: old.unwrap_or_else(|| new.clone()),
                        new,
                        user: self.cache.find_user(user_id),
                    });
                }
            }
        }
    }

    fn on_typing(&mut self, payload: &TypingPayload, out: &mut Translation) {
        let Some(channel) = self.cache.find_channel(payload.channel_id) else {
            return;
        };
        match channel.guild_id {
            Some(guild_id) => {
                if let Some((member, user)) =
                    self.cache.find_member_with_user(guild_id, payload.user_id)
                {
                    out.events.push(Event::MemberTyping {
                        channel,
                        member,
                        user,
                    });
                }
            }
            None => {
                if !channel.recipients.contains(&payload.user_id) {
                    return;
                }
                if let Some(user) = self.cache.find_user(payload.user_id) {
                    out.events.push(Event::UserTyping { channel, user });
                }
            }
        }
    }

    fn on_voice_state(&mut self, voice: VoiceState, out: &mut Translation) {
        let Some(guild_id) = voice.guild_id else {
            return;
        };
        let user_id = voice.user_id;
        if let Some(Upserted { old, new }) = self.cache.set_voice_state(voice) {
            out.events.push(Event::VoiceStateUpdate {
                member: self.cache.find_member(guild_id, user_id),
                old,
                new,
            });
        }
    }

    // =========================================================================
    // Roles and channels
    // =========================================================================

    fn on_role(&mut self, payload: RolePayload, out: &mut Translation) {
        match self.cache.upsert_role(payload.guild_id, payload.role) {
            Some(Upserted { old: Some(old), new }) => out.events.push(Event::RoleUpdate { old, new }),
            Some(Upserted { old: None, new }) => out.events.push(Event::RoleCreate(new)),
            None => {}
        }
    }

    fn on_role_delete(&mut self, payload: &RoleDeletePayload, out: &mut Translation) {
        if let Some(role) = self.cache.remove_role(payload.guild_id, payload.role_id) {
            out.events.push(Event::RoleDelete(role));
        }
    }

    fn on_channel(&mut self, payload: ChannelPayload, out: &mut Translation) {
        match self.cache.upsert_channel(payload.channel, payload.recipients) {
            Some(Upserted { old: Some(old), new }) => {
                out.events.push(Event::ChannelUpdate { old, new });
            }
            Some(Upserted { old: None, new }) => out.events.push(Event::ChannelCreate(new)),
            None => {}
        }
    }

    fn on_channel_delete(&mut self, payload: &ChannelPayload, out: &mut Translation) {
        if let Some(channel) = self.cache.remove_channel(payload.channel.id) {
            out.events.push(Event::ChannelDelete(channel));
        }
    }

    fn on_recipient_add(&mut self, payload: RecipientPayload, out: &mut Translation) {
        let user = payload.user;
        if let Some(channel) = self.cache.add_recipient(payload.channel_id, user.clone()) {
            out.events.push(Event::GroupUserAdd { channel, user });
        }
    }

    fn on_recipient_remove(&mut self, payload: &RecipientPayload, out: &mut Translation) {
        if let Some((channel, user)) = self.cache.remove_recipient(payload.channel_id, payload.user.id)
        {
            out.events.push(Event::GroupUserRemove { channel, user });
        }
    }

    // =========================================================================
    // Messages and reactions
    // =========================================================================

    fn on_message_create(&mut self, payload: MessagePayload, out: &mut Translation) {
        let (message, author) = payload.into_parts();
        self.cache.record_message(message.clone(), Some(author.clone()));

        let mentioned = self
            .cache
            .current_user()
            .is_some_and(|me| message.mentions.contains(&me.id));
        if mentioned {
            out.events.push(Event::MessageMentioned {
                message: message.clone(),
                author: author.clone(),
            });
        }
        out.events.push(Event::MessageCreate { message, author });
    }

    fn on_message_update(&mut self, patch: &MessagePatch, raw: &Value, out: &mut Translation) {
        let updated = self
            .cache
            .update_message(patch.channel_id, patch.id, |message| patch.apply(message));

        match updated {
            Some(Upserted { old: Some(old), new }) => {
                if old.content != new.content {
                    out.events.push(Event::MessageEdit {
                        old: old.clone(),
                        new: new.clone(),
                    });
                }
                out.events.push(Event::MessageUpdate { old, new });
            }
            _ => out.events.push(Event::MessageUpdateUncached {
                channel_id: patch.channel_id,
                message_id: patch.id,
                data: raw.clone(),
            }),
        }
    }

    fn on_message_delete(&mut self, payload: &MessageDeletePayload, out: &mut Translation) {
        match self.cache.forget_message(payload.channel_id, payload.id) {
            MessageLookup::Cached(message) => out.events.push(Event::MessageDelete(message)),
            MessageLookup::Uncached => out.events.push(Event::MessageDeleteUncached {
                channel_id: payload.channel_id,
                message_id: payload.id,
            }),
        }
    }

    fn on_message_delete_bulk(&mut self, payload: &BulkDeletePayload, out: &mut Translation) {
        let messages = self.cache.forget_messages(payload.channel_id, &payload.ids);
        let uncached = payload
            .ids
            .iter()
            .filter(|id| !messages.iter().any(|m| m.id == **id))
            .copied()
            .collect();
        out.events.push(Event::MessageDeleteBulk {
            channel_id: payload.channel_id,
            messages,
            uncached,
        });
    }

    fn on_reaction_add(&mut self, payload: ReactionPayload, out: &mut Translation) {
        match self.cache.add_reaction(
            payload.channel_id,
            payload.message_id,
            &payload.emoji,
            payload.user_id,
        ) {
            Some((message, reaction)) => out.events.push(Event::ReactionAdd {
                message,
                user_id: payload.user_id,
                reaction,
            }),
            None => out.events.push(Event::ReactionAddUncached {
                channel_id: payload.channel_id,
                message_id: payload.message_id,
                user_id: payload.user_id,
                emoji: payload.emoji,
            }),
        }
    }

    fn on_reaction_remove(&mut self, payload: ReactionPayload, out: &mut Translation) {
        match self.cache.remove_reaction(
            payload.channel_id,
            payload.message_id,
            &payload.emoji,
            payload.user_id,
        ) {
            Some((message, Some(reaction))) => out.events.push(Event::ReactionRemove {
                message,
                user_id: payload.user_id,
                reaction,
            }),
            Some((_, None)) => {
                trace!(message_id = %payload.message_id, "Removed reaction was not counted");
            }
            None => out.events.push(Event::ReactionRemoveUncached {
                channel_id: payload.channel_id,
                message_id: payload.message_id,
                user_id: payload.user_id,
                emoji: payload.emoji,
            }),
        }
    }

    fn on_reaction_clear(&mut self, payload: &ReactionClearPayload, out: &mut Translation) {
        match self.cache.clear_reactions(payload.channel_id, payload.message_id) {
            Some((message, reactions)) => {
                out.events.push(Event::ReactionRemoveAll { message, reactions });
            }
            None => out.events.push(Event::ReactionRemoveAllUncached {
                channel_id: payload.channel_id,
                message_id: payload.message_id,
            }),
        }
    }

    // =========================================================================
    // Users and relationships
    // =========================================================================

    fn on_user_update(&mut self, user: User, out: &mut Translation) {
        let Upserted { old, new } = self.cache.set_current_user(user);
        out.events.push(Event::UserUpdate { old, new });
    }

    fn on_relationship_add(&mut self, payload: RelationshipPayload, out: &mut Translation) {
        let user = payload.user;
        let upserted = self.cache.add_relationship(user.clone(), payload.kind);
        out.events.push(Event::RelationshipAdd {
            relationship: upserted.new,
            user,
        });
    }

    fn on_relationship_remove(&mut self, payload: &RelationshipRemovePayload, out: &mut Translation) {
        if let Some(removed) = self.cache.remove_relationship(payload.id) {
            out.events.push(Event::RelationshipRemove {
                relationship: removed.relationship,
                user: removed.user,
            });
        }
    }
}

impl std::fmt::Debug for Translator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Translator")
            .field("shard_id", &self.shard_id)
            .field("ready_fired", &self.ready_fired)
            .field("queued_chunks", &self.chunk_queue.len())
            .finish_non_exhaustive()
    }
}

fn parse<T: DeserializeOwned>(data: &Value) -> Result<T, serde_json::Error> {
    T::deserialize(data)
}
