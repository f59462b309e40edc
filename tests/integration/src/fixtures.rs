//! Gateway payload fixtures

use serde_json::{json, Value};

/// READY for the test bot with the given guild stubs
pub fn ready(session_id: &str, guilds: Value) -> Value {
    json!({
        "v": 6,
        "user": {"id": "1", "username": "ferris", "discriminator": "0001", "bot": true},
        "session_id": session_id,
        "guilds": guilds,
        "private_channels": [],
        "relationships": [],
        "presences": []
    })
}

/// Guild stub as READY lists it before the guild streams in
pub fn unavailable_guild(id: &str) -> Value {
    json!({"id": id, "unavailable": true})
}

/// Full GUILD_CREATE payload with `members` of its `member_count` members
pub fn guild(id: &str, large: bool, member_count: u64, members: usize) -> Value {
    let members: Vec<Value> = (0..members).map(|i| member(&(1000 + i).to_string())).collect();
    json!({
        "id": id,
        "name": format!("guild-{id}"),
        "owner_id": "1",
        "large": large,
        "member_count": member_count,
        "channels": [{"id": format!("{id}1"), "type": 0, "name": "general"}],
        "members": members
    })
}

pub fn member(user_id: &str) -> Value {
    json!({
        "user": {"id": user_id, "username": format!("user-{user_id}"), "discriminator": "0001"},
        "roles": []
    })
}

/// GUILD_MEMBERS_CHUNK carrying `user_ids`
pub fn member_chunk(guild_id: &str, user_ids: &[&str]) -> Value {
    let members: Vec<Value> = user_ids.iter().map(|id| member(id)).collect();
    json!({
        "guild_id": guild_id,
        "members": members,
        "chunk_index": 0,
        "chunk_count": 1
    })
}

pub fn message(id: &str, channel_id: &str, content: &str) -> Value {
    json!({
        "id": id,
        "channel_id": channel_id,
        "author": {"id": "2", "username": "corro", "discriminator": "0002"},
        "content": content
    })
}
