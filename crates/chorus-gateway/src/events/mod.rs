//! Domain events
//!
//! Raw dispatches are applied to the cache by the [`Translator`], which derives the
//! events below. The [`Dispatcher`] hands them to registered handlers.

mod dispatcher;
pub mod payloads;
mod translator;

pub use dispatcher::{Dispatcher, EventContext, EventHandler, HandlerId, ListenerFlow, WaitFor};
pub use translator::{Lifecycle, ReadyTracker, Translation, Translator};

use chorus_core::{
    Channel, Guild, Member, Message, Reaction, ReactionEmoji, Relationship, Role, Snowflake, User,
    VoiceState,
};
use serde_json::Value;

/// Everything a handler can subscribe to
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    // === Lifecycle ===
    /// READY received; the shard is streaming its guilds
    Connect { shard_id: u32 },
    /// Every guild of the shard is available and chunked
    Ready { shard_id: u32 },
    /// Every shard is ready
    ShardsReady { shard_count: u32 },
    Resumed { shard_id: u32, replayed: u64 },
    Disconnect {
        shard_id: u32,
        code: Option<u16>,
        reason: String,
        will_resume: bool,
    },
    ShardFailed { shard_id: u32, reason: String },

    // === Guilds ===
    /// Guild delivered while the shard was still streaming
    GuildStreamed(Guild),
    /// Known guild became available again
    GuildAvailable(Guild),
    GuildJoin(Guild),
    GuildUpdate { old: Guild, new: Guild },
    GuildUnavailable(Guild),
    GuildLeave(Guild),
    GuildEmojisUpdate { old: Guild, new: Guild },
    GuildChunk {
        guild: Guild,
        members: usize,
        complete: bool,
    },
    GuildSync { guild: Guild, members: usize },

    // === Members ===
    MemberJoin { member: Member, user: User },
    MemberUpdate {
        old: Member,
        new: Member,
        user: Option<User>,
    },
    MemberLeave { member: Member, user: Option<User> },
    MemberBan {
        guild: Guild,
        member: Member,
        user: User,
    },
    /// Ban of a user who is not a cached member
    UserBan { guild: Guild, user: User },
    UserUnban { guild: Guild, user: User },
    MemberTyping {
        channel: Channel,
        member: Member,
        user: User,
    },
    UserTyping { channel: Channel, user: User },

    // === Roles ===
    RoleCreate(Role),
    RoleUpdate { old: Role, new: Role },
    RoleDelete(Role),

    // === Channels ===
    ChannelCreate(Channel),
    ChannelUpdate { old: Channel, new: Channel },
    ChannelDelete(Channel),
    GroupUserAdd { channel: Channel, user: User },
    GroupUserRemove { channel: Channel, user: Option<User> },

    // === Messages ===
    MessageCreate { message: Message, author: User },
    /// The current user was mentioned
    MessageMentioned { message: Message, author: User },
    MessageUpdate { old: Message, new: Message },
    /// Content changed
    MessageEdit { old: Message, new: Message },
    MessageUpdateUncached {
        channel_id: Snowflake,
        message_id: Snowflake,
        data: Value,
    },
    MessageDelete(Message),
    MessageDeleteUncached {
        channel_id: Snowflake,
        message_id: Snowflake,
    },
    MessageDeleteBulk {
        channel_id: Snowflake,
        messages: Vec<Message>,
        uncached: Vec<Snowflake>,
    },

    // === Reactions ===
    ReactionAdd {
        message: Message,
        user_id: Snowflake,
        reaction: Reaction,
    },
    ReactionAddUncached {
        channel_id: Snowflake,
        message_id: Snowflake,
        user_id: Snowflake,
        emoji: ReactionEmoji,
    },
    ReactionRemove {
        message: Message,
        user_id: Snowflake,
        reaction: Reaction,
    },
    ReactionRemoveUncached {
        channel_id: Snowflake,
        message_id: Snowflake,
        user_id: Snowflake,
        emoji: ReactionEmoji,
    },
    ReactionRemoveAll {
        message: Message,
        reactions: Vec<Reaction>,
    },
    ReactionRemoveAllUncached {
        channel_id: Snowflake,
        message_id: Snowflake,
    },

    // === Users ===
    FriendUpdate {
        old: Relationship,
        new: Relationship,
        user: Option<User>,
    },
    UserUpdate { old: Option<User>, new: User },
    VoiceStateUpdate {
        member: Option<Member>,
        old: Option<VoiceState>,
        new: VoiceState,
    },
    RelationshipAdd {
        relationship: Relationship,
        user: User,
    },
    RelationshipRemove {
        relationship: Relationship,
        user: Option<User>,
    },
}

/// Closed set of event names handlers register for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventName {
    Connect,
    Ready,
    ShardsReady,
    Resumed,
    Disconnect,
    ShardFailed,
    GuildStreamed,
    GuildAvailable,
    GuildJoin,
    GuildUpdate,
    GuildUnavailable,
    GuildLeave,
    GuildEmojisUpdate,
    GuildChunk,
    GuildSync,
    MemberJoin,
    MemberUpdate,
    MemberLeave,
    MemberBan,
    UserBan,
    UserUnban,
    MemberTyping,
    UserTyping,
    RoleCreate,
    RoleUpdate,
    RoleDelete,
    ChannelCreate,
    ChannelUpdate,
    ChannelDelete,
    GroupUserAdd,
    GroupUserRemove,
    MessageCreate,
    MessageMentioned,
    MessageUpdate,
    MessageEdit,
    MessageUpdateUncached,
    MessageDelete,
    MessageDeleteUncached,
    MessageDeleteBulk,
    ReactionAdd,
    ReactionAddUncached,
    ReactionRemove,
    ReactionRemoveUncached,
    ReactionRemoveAll,
    ReactionRemoveAllUncached,
    FriendUpdate,
    UserUpdate,
    VoiceStateUpdate,
    RelationshipAdd,
    RelationshipRemove,
}

impl EventName {
    /// Lifecycle events; useful for logging subscribers
    pub const LIFECYCLE: [EventName; 6] = [
        Self::Connect,
        Self::Ready,
        Self::ShardsReady,
        Self::Resumed,
        Self::Disconnect,
        Self::ShardFailed,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Ready => "ready",
            Self::ShardsReady => "shards_ready",
            Self::Resumed => "resumed",
            Self::Disconnect => "disconnect",
            Self::ShardFailed => "shard_failed",
            Self::GuildStreamed => "guild_streamed",
            Self::GuildAvailable => "guild_available",
            Self::GuildJoin => "guild_join",
            Self::GuildUpdate => "guild_update",
            Self::GuildUnavailable => "guild_unavailable",
            Self::GuildLeave => "guild_leave",
            Self::GuildEmojisUpdate => "guild_emojis_update",
            Self::GuildChunk => "guild_chunk",
            Self::GuildSync => "guild_sync",
            Self::MemberJoin => "member_join",
            Self::MemberUpdate => "member_update",
            Self::MemberLeave => "member_leave",
            Self::MemberBan => "member_ban",
            Self::UserBan => "user_ban",
            Self::UserUnban => "user_unban",
            Self::MemberTyping => "member_typing",
            Self::UserTyping => "user_typing",
            Self::RoleCreate => "role_create",
            Self::RoleUpdate => "role_update",
            Self::RoleDelete => "role_delete",
            Self::ChannelCreate => "channel_create",
            Self::ChannelUpdate => "channel_update",
            Self::ChannelDelete => "channel_delete",
            Self::GroupUserAdd => "group_user_add",
            Self::GroupUserRemove => "group_user_remove",
            Self::MessageCreate => "message_create",
            Self::MessageMentioned => "message_mentioned",
            Self::MessageUpdate => "message_update",
            Self::MessageEdit => "message_edit",
            Self::MessageUpdateUncached => "message_update_uncached",
            Self::MessageDelete => "message_delete",
            Self::MessageDeleteUncached => "message_delete_uncached",
            Self::MessageDeleteBulk => "message_delete_bulk",
            Self::ReactionAdd => "reaction_add",
            Self::ReactionAddUncached => "reaction_add_uncached",
            Self::ReactionRemove => "reaction_remove",
            Self::ReactionRemoveUncached => "reaction_remove_uncached",
            Self::ReactionRemoveAll => "reaction_remove_all",
            Self::ReactionRemoveAllUncached => "reaction_remove_all_uncached",
            Self::FriendUpdate => "friend_update",
            Self::UserUpdate => "user_update",
            Self::VoiceStateUpdate => "voice_state_update",
            Self::RelationshipAdd => "relationship_add",
            Self::RelationshipRemove => "relationship_remove",
        }
    }
}

impl std::fmt::Display for EventName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Event {
    #[must_use]
    pub fn name(&self) -> EventName {
        match self {
            Self::Connect { .. } => EventName::Connect,
            Self::Ready { .. } => EventName::Ready,
            Self::ShardsReady { .. } => EventName::ShardsReady,
            Self::Resumed { .. } => EventName::Resumed,
            Self::Disconnect { .. } => EventName::Disconnect,
            Self::ShardFailed { .. } => EventName::ShardFailed,
            Self::GuildStreamed(_) => EventName::GuildStreamed,
            Self::GuildAvailable(_) => EventName::GuildAvailable,
            Self::GuildJoin(_) => EventName::GuildJoin,
            Self::GuildUpdate { .. } => EventName::GuildUpdate,
            Self::GuildUnavailable(_) => EventName::GuildUnavailable,
            Self::GuildLeave(_) => EventName::GuildLeave,
            Self::GuildEmojisUpdate { .. } => EventName::GuildEmojisUpdate,
            Self::GuildChunk { .. } => EventName::GuildChunk,
            Self::GuildSync { .. } => EventName::GuildSync,
            Self::MemberJoin { .. } => EventName::MemberJoin,
            Self::MemberUpdate { .. } => EventName::MemberUpdate,
            Self::MemberLeave { .. } => EventName::MemberLeave,
            Self::MemberBan { .. } => EventName::MemberBan,
            Self::UserBan { .. } => EventName::UserBan,
            Self::UserUnban { .. } => EventName::UserUnban,
            Self::MemberTyping { .. } => EventName::MemberTyping,
            Self::UserTyping { .. } => EventName::UserTyping,
            Self::RoleCreate(_) => EventName::RoleCreate,
            Self::RoleUpdate { .. } => EventName::RoleUpdate,
            Self::RoleDelete(_) => EventName::RoleDelete,
            Self::ChannelCreate(_) => EventName::ChannelCreate,
            Self::ChannelUpdate { .. } => EventName::ChannelUpdate,
            Self::ChannelDelete(_) => EventName::ChannelDelete,
            Self::GroupUserAdd { .. } => EventName::GroupUserAdd,
            Self::GroupUserRemove { .. } => EventName::GroupUserRemove,
            Self::MessageCreate { .. } => EventName::MessageCreate,
            Self::MessageMentioned { .. } => EventName::MessageMentioned,
            Self::MessageUpdate { .. } => EventName::MessageUpdate,
            Self::MessageEdit { .. } => EventName::MessageEdit,
            Self::MessageUpdateUncached { .. } => EventName::MessageUpdateUncached,
            Self::MessageDelete(_) => EventName::MessageDelete,
            Self::MessageDeleteUncached { .. } => EventName::MessageDeleteUncached,
            Self::MessageDeleteBulk { .. } => EventName::MessageDeleteBulk,
            Self::ReactionAdd { .. } => EventName::ReactionAdd,
            Self::ReactionAddUncached { .. } => EventName::ReactionAddUncached,
            Self::ReactionRemove { .. } => EventName::ReactionRemove,
            Self::ReactionRemoveUncached { .. } => EventName::ReactionRemoveUncached,
            Self::ReactionRemoveAll { .. } => EventName::ReactionRemoveAll,
            Self::ReactionRemoveAllUncached { .. } => EventName::ReactionRemoveAllUncached,
            Self::FriendUpdate { .. } => EventName::FriendUpdate,
            Self::UserUpdate { .. } => EventName::UserUpdate,
            Self::VoiceStateUpdate { .. } => EventName::VoiceStateUpdate,
            Self::RelationshipAdd { .. } => EventName::RelationshipAdd,
            Self::RelationshipRemove { .. } => EventName::RelationshipRemove,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names() {
        let event = Event::Resumed {
            shard_id: 0,
            replayed: 3,
        };
        assert_eq!(event.name(), EventName::Resumed);
        assert_eq!(event.name().to_string(), "resumed");

        let event = Event::MessageDeleteUncached {
            channel_id: Snowflake::new(1),
            message_id: Snowflake::new(2),
        };
        assert_eq!(event.name().as_str(), "message_delete_uncached");
    }

    #[test]
    fn test_lifecycle_names_are_distinct() {
        let names: std::collections::HashSet<_> = EventName::LIFECYCLE.iter().collect();
        assert_eq!(names.len(), EventName::LIFECYCLE.len());
    }
}
