//! # chorus-core
//!
//! Domain layer containing the value objects and entities mirrored from the gateway.
//! Entities here are plain data: relationships between them are expressed by id and
//! resolved through the cache, never by holding references to each other.

pub mod entities;
pub mod value_objects;

// Re-export commonly used types at crate root
pub use entities::{
    Activity, Channel, ChannelKind, Emoji, Guild, Member, Message, OverwriteKind,
    PermissionOverwrite, Presence, Reaction, ReactionEmoji, Relationship, RelationshipKind, Role,
    Status, User, VoiceState,
};
pub use value_objects::{Permissions, Snowflake, SnowflakeParseError};
