//! Dispatch payloads as they arrive on the wire
//!
//! The cache stores members and messages by user id, while the gateway embeds full user
//! objects. These structs take the wire shape apart into what the cache keeps.

use std::collections::HashMap;

use chorus_cache::GuildContents;
use chorus_core::{
    Activity, Channel, Emoji, Guild, Member, Message, Presence, Reaction, ReactionEmoji,
    RelationshipKind, Role, Snowflake, Status, User, VoiceState,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

/// Guild member with its embedded user
#[derive(Debug, Clone, Deserialize)]
pub struct MemberPayload {
    pub user: User,
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
    #[serde(default)]
    pub nick: Option<String>,
    #[serde(default)]
    pub roles: Vec<Snowflake>,
    #[serde(default)]
    pub joined_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deaf: bool,
    #[serde(default)]
    pub mute: bool,
}

impl MemberPayload {
    pub fn into_parts(self, guild_id: Snowflake) -> (User, Member) {
        let mut member = Member::new(self.guild_id.unwrap_or(guild_id), self.user.id);
        member.nick = self.nick;
        member.roles = self.roles;
        member.joined_at = self.joined_at;
        member.deaf = self.deaf;
        member.mute = self.mute;
        (self.user, member)
    }
}

/// User object that may only carry an id
#[derive(Debug, Clone, Deserialize)]
pub struct PartialUser {
    pub id: Snowflake,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub discriminator: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub bot: Option<bool>,
}

impl PartialUser {
    /// Full user, when the payload carried one
    pub fn complete(&self) -> Option<User> {
        let username = self.username.clone()?;
        let mut user = User::new(
            self.id,
            username,
            self.discriminator.clone().unwrap_or_default(),
        );
        user.avatar.clone_from(&self.avatar);
        user.bot = self.bot.unwrap_or(false);
        Some(user)
    }
}

/// PRESENCE_UPDATE and the presences embedded in guilds
#[derive(Debug, Clone, Deserialize)]
pub struct PresencePayload {
    pub user: PartialUser,
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub game: Option<Activity>,
    #[serde(default)]
    pub roles: Option<Vec<Snowflake>>,
    #[serde(default)]
    pub nick: Option<String>,
}

impl PresencePayload {
    pub fn presence(&self) -> Presence {
        Presence::new(self.status, self.game.clone())
    }
}

/// Channel with its recipients (private channels)
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelPayload {
    #[serde(flatten)]
    pub channel: Channel,
    #[serde(default)]
    pub recipients: Vec<User>,
}

/// GUILD_CREATE, and guild objects embedded in READY
#[derive(Debug, Clone, Deserialize)]
pub struct GuildPayload {
    #[serde(flatten)]
    pub guild: Guild,
    #[serde(default)]
    pub channels: Vec<Channel>,
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(default)]
    pub members: Vec<MemberPayload>,
    #[serde(default)]
    pub presences: Vec<PresencePayload>,
    #[serde(default)]
    pub voice_states: Vec<VoiceState>,
}

impl GuildPayload {
    /// Split into the guild row and what it owns, attaching presences to members
    pub fn into_parts(self, shard_id: u32) -> (Guild, GuildContents) {
        let mut guild = self.guild;
        let guild_id = guild.id;
        guild.shard_id = shard_id;
        guild.voice_states = self
            .voice_states
            .into_iter()
            .filter(VoiceState::is_connected)
            .map(|mut voice| {
                voice.guild_id = Some(guild_id);
                (voice.user_id, voice)
            })
            .collect();

        let presences: HashMap<Snowflake, Presence> = self
            .presences
            .iter()
            .map(|p| (p.user.id, p.presence()))
            .collect();

        let members = self
            .members
            .into_iter()
            .map(|payload| {
                let (user, mut member) = payload.into_parts(guild_id);
                if let Some(presence) = presences.get(&user.id) {
                    member.presence = presence.clone();
                }
                (user, member)
            })
            .collect();

        let contents = GuildContents {
            channels: self.channels,
            roles: self.roles,
            members,
        };
        (guild, contents)
    }
}

/// GUILD_DELETE
#[derive(Debug, Clone, Deserialize)]
pub struct GuildDeletePayload {
    pub id: Snowflake,
    #[serde(default)]
    pub unavailable: bool,
}

/// GUILD_MEMBERS_CHUNK
#[derive(Debug, Clone, Deserialize)]
pub struct MemberChunkPayload {
    pub guild_id: Snowflake,
    #[serde(default)]
    pub members: Vec<MemberPayload>,
    #[serde(default)]
    pub chunk_index: Option<u32>,
    #[serde(default)]
    pub chunk_count: Option<u32>,
}

/// GUILD_SYNC (user accounts)
#[derive(Debug, Clone, Deserialize)]
pub struct GuildSyncPayload {
    pub id: Snowflake,
    #[serde(default)]
    pub large: bool,
    #[serde(default)]
    pub members: Vec<MemberPayload>,
    #[serde(default)]
    pub presences: Vec<PresencePayload>,
}

/// GUILD_MEMBER_REMOVE, GUILD_BAN_ADD, GUILD_BAN_REMOVE
#[derive(Debug, Clone, Deserialize)]
pub struct GuildUserPayload {
    pub guild_id: Snowflake,
    pub user: User,
}

/// GUILD_MEMBER_UPDATE
#[derive(Debug, Clone, Deserialize)]
pub struct MemberUpdatePayload {
    pub guild_id: Snowflake,
    pub user: User,
    #[serde(default)]
    pub roles: Vec<Snowflake>,
    #[serde(default)]
    pub nick: Option<String>,
}

/// GUILD_ROLE_CREATE, GUILD_ROLE_UPDATE
#[derive(Debug, Clone, Deserialize)]
pub struct RolePayload {
    pub guild_id: Snowflake,
    pub role: Role,
}

/// GUILD_ROLE_DELETE
#[derive(Debug, Clone, Deserialize)]
pub struct RoleDeletePayload {
    pub guild_id: Snowflake,
    pub role_id: Snowflake,
}

/// GUILD_EMOJIS_UPDATE
#[derive(Debug, Clone, Deserialize)]
pub struct EmojisPayload {
    pub guild_id: Snowflake,
    #[serde(default)]
    pub emojis: Vec<Emoji>,
}

/// CHANNEL_RECIPIENT_ADD, CHANNEL_RECIPIENT_REMOVE
#[derive(Debug, Clone, Deserialize)]
pub struct RecipientPayload {
    pub channel_id: Snowflake,
    pub user: User,
}

/// MESSAGE_CREATE, and messages fetched over HTTP
#[derive(Debug, Clone, Deserialize)]
pub struct MessagePayload {
    pub id: Snowflake,
    pub channel_id: Snowflake,
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
    pub author: User,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub edited_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tts: bool,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub mention_everyone: bool,
    #[serde(default)]
    pub mentions: Vec<User>,
    #[serde(default)]
    pub mention_roles: Vec<Snowflake>,
    #[serde(default)]
    pub attachments: Vec<Value>,
    #[serde(default)]
    pub embeds: Vec<Value>,
    #[serde(default)]
    pub reactions: Vec<Reaction>,
    #[serde(rename = "type", default)]
    pub kind: u8,
}

impl MessagePayload {
    pub fn into_parts(self) -> (Message, User) {
        let mut message = Message::new(self.id, self.channel_id, self.author.id, self.content);
        message.guild_id = self.guild_id;
        message.timestamp = self.timestamp;
        message.edited_timestamp = self.edited_timestamp;
        message.tts = self.tts;
        message.pinned = self.pinned;
        message.mention_everyone = self.mention_everyone;
        message.mentions = self.mentions.iter().map(|u| u.id).collect();
        message.mention_roles = self.mention_roles;
        message.attachments = self.attachments;
        message.embeds = self.embeds;
        message.reactions = self.reactions;
        message.kind = self.kind;
        (message, self.author)
    }
}

/// MESSAGE_UPDATE: only the changed fields are guaranteed
#[derive(Debug, Clone, Deserialize)]
pub struct MessagePatch {
    pub id: Snowflake,
    pub channel_id: Snowflake,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub edited_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub pinned: Option<bool>,
    #[serde(default)]
    pub mention_everyone: Option<bool>,
    #[serde(default)]
    pub mentions: Option<Vec<User>>,
    #[serde(default)]
    pub mention_roles: Option<Vec<Snowflake>>,
    #[serde(default)]
    pub attachments: Option<Vec<Value>>,
    #[serde(default)]
    pub embeds: Option<Vec<Value>>,
}

impl MessagePatch {
    pub fn apply(&self, message: &mut Message) {
        if let Some(content) = &self.content {
            message.content.clone_from(content);
        }
        if self.edited_timestamp.is_some() {
            message.edited_timestamp = self.edited_timestamp;
        }
        if let Some(pinned) = self.pinned {
            message.pinned = pinned;
        }
        if let Some(everyone) = self.mention_everyone {
            message.mention_everyone = everyone;
        }
        if let Some(mentions) = &self.mentions {
            message.mentions = mentions.iter().map(|u| u.id).collect();
        }
        if let Some(roles) = &self.mention_roles {
            message.mention_roles.clone_from(roles);
        }
        if let Some(attachments) = &self.attachments {
            message.attachments.clone_from(attachments);
        }
        if let Some(embeds) = &self.embeds {
            message.embeds.clone_from(embeds);
        }
    }
}

/// MESSAGE_DELETE
#[derive(Debug, Clone, Deserialize)]
pub struct MessageDeletePayload {
    pub id: Snowflake,
    pub channel_id: Snowflake,
}

/// MESSAGE_DELETE_BULK
#[derive(Debug, Clone, Deserialize)]
pub struct BulkDeletePayload {
    pub ids: Vec<Snowflake>,
    pub channel_id: Snowflake,
}

/// MESSAGE_REACTION_ADD, MESSAGE_REACTION_REMOVE
#[derive(Debug, Clone, Deserialize)]
pub struct ReactionPayload {
    pub user_id: Snowflake,
    pub channel_id: Snowflake,
    pub message_id: Snowflake,
    pub emoji: ReactionEmoji,
}

/// MESSAGE_REACTION_REMOVE_ALL
#[derive(Debug, Clone, Deserialize)]
pub struct ReactionClearPayload {
    pub channel_id: Snowflake,
    pub message_id: Snowflake,
}

/// TYPING_START
#[derive(Debug, Clone, Deserialize)]
pub struct TypingPayload {
    pub channel_id: Snowflake,
    pub user_id: Snowflake,
    #[serde(default)]
    pub timestamp: i64,
}

/// RELATIONSHIP_ADD and the relationships embedded in READY
#[derive(Debug, Clone, Deserialize)]
pub struct RelationshipPayload {
    pub id: Snowflake,
    #[serde(rename = "type")]
    pub kind: RelationshipKind,
    pub user: User,
}

/// RELATIONSHIP_REMOVE
#[derive(Debug, Clone, Deserialize)]
pub struct RelationshipRemovePayload {
    pub id: Snowflake,
}

/// READY
#[derive(Debug, Clone, Deserialize)]
pub struct ReadyPayload {
    #[serde(default)]
    pub v: u8,
    pub user: User,
    pub session_id: String,
    #[serde(default)]
    pub guilds: Vec<GuildPayload>,
    #[serde(default)]
    pub private_channels: Vec<ChannelPayload>,
    #[serde(default)]
    pub relationships: Vec<RelationshipPayload>,
    #[serde(default)]
    pub presences: Vec<PresencePayload>,
}

/// Copy the fields GUILD_UPDATE owns, keeping what the cache tracks itself
pub fn merge_guild_update(cached: &mut Guild, update: Guild) {
    cached.name = update.name;
    cached.icon = update.icon;
    cached.owner_id = update.owner_id;
    cached.region = update.region;
    cached.features = update.features;
    cached.afk_channel_id = update.afk_channel_id;
    cached.afk_timeout = update.afk_timeout;
    cached.system_channel_id = update.system_channel_id;
    cached.verification_level = update.verification_level;
    cached.mfa_level = update.mfa_level;
    if !update.emojis.is_empty() {
        cached.emojis = update.emojis;
    }
}
