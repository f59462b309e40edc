//! Integration test utilities for the gateway client
//!
//! This crate provides an in-memory gateway the shards connect to, plus payload
//! fixtures, so whole shard lifecycles can be driven under paused Tokio time.

pub mod fixtures;
pub mod helpers;

pub use fixtures::*;
pub use helpers::*;
