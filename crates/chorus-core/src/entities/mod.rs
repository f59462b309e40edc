//! Domain entities - the objects mirrored from the gateway

mod channel;
mod emoji;
mod guild;
mod member;
mod message;
mod presence;
mod reaction;
mod relationship;
mod role;
mod user;
mod voice;

pub use channel::{Channel, ChannelKind, OverwriteKind, PermissionOverwrite};
pub use emoji::Emoji;
pub use guild::Guild;
pub use member::Member;
pub use message::Message;
pub use presence::{Activity, Presence, Status};
pub use reaction::{Reaction, ReactionEmoji};
pub use relationship::{Relationship, RelationshipKind};
pub use role::Role;
pub use user::User;
pub use voice::VoiceState;
