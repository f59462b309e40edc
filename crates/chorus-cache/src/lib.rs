//! # chorus-cache
//!
//! In-memory object graph mirrored from the gateway.
//!
//! ## Consistency
//!
//! - **One lock**: the whole graph sits behind a single `parking_lot::RwLock`. Every
//!   mutation is one synchronous critical section, so readers never see half of an update
//!   and a cancelled task can never leave one behind.
//! - **Ids, not references**: members, messages, and private channels refer to users by id.
//!   There is exactly one `User` per account, resolved on access.
//! - **Event-driven eviction**: a user is only evicted when a member is removed, a
//!   relationship is removed, or a guild is removed, and only if nothing else references it.
//! - **Snapshots out**: lookups return clones. Mutations return the value before and after
//!   (`Upserted`), with the "before" cloned prior to the change.
//!
//! ## Example
//!
//! ```ignore
//! use chorus_cache::{Cache, CacheConfig, MessageLookup};
//!
//! let cache = Cache::new(CacheConfig::default());
//! cache.record_message(message, author);
//!
//! match cache.find_message(channel_id, message_id) {
//!     MessageLookup::Cached(message) => println!("{}", message.content),
//!     MessageLookup::Uncached => println!("not in the cache"),
//! }
//! ```

mod cache;
mod messages;
mod permissions;
mod state;
mod upsert;

pub use cache::{
    Cache, CacheConfig, CacheStats, ChunkProgress, GuildContents, PresenceChange, RemovedGuild,
    RemovedMember, RemovedRelationship,
};
pub use permissions::{base_permissions, channel_permissions};
pub use upsert::{MessageLookup, Upserted};
