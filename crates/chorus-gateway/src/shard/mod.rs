//! Shard connection management
//!
//! - [`Session`]: protocol state machine, no I/O
//! - [`HeartbeatMonitor`]: heartbeat pacing and zombie detection
//! - [`Backoff`]: reconnect delays
//! - [`IdentifyLimiter`]: IDENTIFY pacing shared by all shards
//! - [`ShardRunner`]: drives a shard's connections

mod backoff;
mod heartbeat;
mod limiter;
mod runner;
mod session;

pub use backoff::{invalid_session_delay, Backoff};
pub use heartbeat::{Beat, HeartbeatMonitor};
pub use limiter::IdentifyLimiter;
pub use runner::{Outbound, ShardConfig, ShardRunner, ShardShared};
pub use session::{Action, Dispatch, Handshake, Session, ShardState};
