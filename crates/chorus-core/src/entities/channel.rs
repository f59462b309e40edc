//! Channel entity - guild text/voice/category channels and private (DM / group) channels

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::value_objects::{Permissions, Snowflake};

/// Channel kind, as sent in the `type` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ChannelKind {
    #[default]
    Text,
    Private,
    Voice,
    Group,
    Category,
    News,
    Store,
    /// A kind this client does not know about yet
    Unknown(u8),
}

impl ChannelKind {
    /// Get the numeric value
    #[inline]
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Text => 0,
            Self::Private => 1,
            Self::Voice => 2,
            Self::Group => 3,
            Self::Category => 4,
            Self::News => 5,
            Self::Store => 6,
            Self::Unknown(value) => value,
        }
    }

    /// DM or group DM
    #[inline]
    pub fn is_private(self) -> bool {
        matches!(self, Self::Private | Self::Group)
    }
}

impl From<u8> for ChannelKind {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Text,
            1 => Self::Private,
            2 => Self::Voice,
            3 => Self::Group,
            4 => Self::Category,
            5 => Self::News,
            6 => Self::Store,
            other => Self::Unknown(other),
        }
    }
}

impl Serialize for ChannelKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.as_u8())
    }
}

impl<'de> Deserialize<'de> for ChannelKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        u8::deserialize(deserializer).map(Self::from)
    }
}

/// Target of a permission overwrite
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OverwriteKind {
    Role,
    Member,
}

impl Serialize for OverwriteKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(match self {
            Self::Role => "role",
            Self::Member => "member",
        })
    }
}

// Older API versions send "role"/"member", newer ones 0/1.
impl<'de> Deserialize<'de> for OverwriteKind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::{self, Visitor};

        struct KindVisitor;

        impl Visitor<'_> for KindVisitor {
            type Value = OverwriteKind;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("\"role\", \"member\", 0 or 1")
            }

            fn visit_u64<E: de::Error>(self, value: u64) -> Result<OverwriteKind, E> {
                match value {
                    0 => Ok(OverwriteKind::Role),
                    1 => Ok(OverwriteKind::Member),
                    _ => Err(de::Error::custom(format!("unknown overwrite type {value}"))),
                }
            }

            fn visit_i64<E: de::Error>(self, value: i64) -> Result<OverwriteKind, E> {
                let value = u64::try_from(value)
                    .map_err(|_| de::Error::custom(format!("unknown overwrite type {value}")))?;
                self.visit_u64(value)
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<OverwriteKind, E> {
                match value {
                    "role" => Ok(OverwriteKind::Role),
                    "member" => Ok(OverwriteKind::Member),
                    _ => Err(de::Error::custom(format!("unknown overwrite type {value}"))),
                }
            }
        }

        deserializer.deserialize_any(KindVisitor)
    }
}

/// Channel-level allow/deny for a role or a member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionOverwrite {
    pub id: Snowflake,
    #[serde(rename = "type")]
    pub kind: OverwriteKind,
    #[serde(default)]
    pub allow: Permissions,
    #[serde(default)]
    pub deny: Permissions,
}

/// Channel entity
///
/// `recipients` holds user ids only; the users themselves live in the global user cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: Snowflake,
    #[serde(rename = "type", default)]
    pub kind: ChannelKind,
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub position: i32,
    #[serde(default)]
    pub parent_id: Option<Snowflake>,
    #[serde(default)]
    pub nsfw: bool,
    #[serde(default)]
    pub permission_overwrites: Vec<PermissionOverwrite>,
    #[serde(default)]
    pub last_message_id: Option<Snowflake>,
    #[serde(default)]
    pub bitrate: Option<u32>,
    #[serde(default)]
    pub user_limit: Option<u32>,
    #[serde(default)]
    pub owner_id: Option<Snowflake>,
    #[serde(skip)]
    pub recipients: Vec<Snowflake>,
}

impl Channel {
    /// Create a new guild text channel
    pub fn new_text(id: Snowflake, guild_id: Snowflake, name: impl Into<String>) -> Self {
        Self {
            guild_id: Some(guild_id),
            name: Some(name.into()),
            ..Self::blank(id, ChannelKind::Text)
        }
    }

    /// Create a new DM channel with a single recipient
    pub fn new_private(id: Snowflake, recipient: Snowflake) -> Self {
        Self {
            recipients: vec![recipient],
            ..Self::blank(id, ChannelKind::Private)
        }
    }

    fn blank(id: Snowflake, kind: ChannelKind) -> Self {
        Self {
            id,
            kind,
            guild_id: None,
            name: None,
            topic: None,
            position: 0,
            parent_id: None,
            nsfw: false,
            permission_overwrites: Vec::new(),
            last_message_id: None,
            bitrate: None,
            user_limit: None,
            owner_id: None,
            recipients: Vec::new(),
        }
    }

    /// Check if this is a DM or group channel
    #[inline]
    pub fn is_private(&self) -> bool {
        self.kind.is_private()
    }

    /// Overwrite targeting the given role or member id
    pub fn overwrite_for(&self, id: Snowflake) -> Option<&PermissionOverwrite> {
        self.permission_overwrites.iter().find(|o| o.id == id)
    }

    /// Mention string usable in message content
    pub fn mention(&self) -> String {
        format!("<#{}>", self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_kind_from_u8() {
        assert_eq!(ChannelKind::from(0), ChannelKind::Text);
        assert_eq!(ChannelKind::from(3), ChannelKind::Group);
        assert_eq!(ChannelKind::from(13), ChannelKind::Unknown(13));
        assert_eq!(ChannelKind::Unknown(13).as_u8(), 13);
        assert!(ChannelKind::Private.is_private());
        assert!(!ChannelKind::Category.is_private());
    }

    #[test]
    fn test_channel_deserialize_with_overwrites() {
        let channel: Channel = serde_json::from_str(
            r#"{
                "id": "41771983423143937",
                "type": 0,
                "guild_id": "41771983423143937",
                "name": "general",
                "position": 6,
                "permission_overwrites": [
                    {"id": "41771983423143937", "type": "role", "allow": 0, "deny": 2048},
                    {"id": "80351110224678912", "type": 1, "allow": "1024", "deny": "0"}
                ],
                "nsfw": true
            }"#,
        )
        .unwrap();

        assert_eq!(channel.kind, ChannelKind::Text);
        assert_eq!(channel.position, 6);
        assert!(channel.nsfw);
        assert_eq!(channel.permission_overwrites.len(), 2);
        assert_eq!(channel.permission_overwrites[0].kind, OverwriteKind::Role);
        assert_eq!(channel.permission_overwrites[0].deny, Permissions::SEND_MESSAGES);
        assert_eq!(channel.permission_overwrites[1].kind, OverwriteKind::Member);
        assert_eq!(
            channel.overwrite_for(Snowflake::new(80_351_110_224_678_912)).map(|o| o.allow),
            Some(Permissions::VIEW_CHANNEL)
        );
    }

    #[test]
    fn test_private_channel() {
        let channel = Channel::new_private(Snowflake::new(1), Snowflake::new(2));
        assert!(channel.is_private());
        assert!(channel.guild_id.is_none());
        assert_eq!(channel.recipients, vec![Snowflake::new(2)]);
    }
}
