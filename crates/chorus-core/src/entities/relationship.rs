//! Relationship - friend / block list entry of a user account

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::presence::Presence;
use crate::value_objects::Snowflake;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationshipKind {
    Friend,
    Blocked,
    IncomingRequest,
    OutgoingRequest,
    Unknown(u8),
}

impl From<u8> for RelationshipKind {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::Friend,
            2 => Self::Blocked,
            3 => Self::IncomingRequest,
            4 => Self::OutgoingRequest,
            other => Self::Unknown(other),
        }
    }
}

impl From<RelationshipKind> for u8 {
    fn from(kind: RelationshipKind) -> Self {
        match kind {
            RelationshipKind::Friend => 1,
            RelationshipKind::Blocked => 2,
            RelationshipKind::IncomingRequest => 3,
            RelationshipKind::OutgoingRequest => 4,
            RelationshipKind::Unknown(value) => value,
        }
    }
}

impl Serialize for RelationshipKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8((*self).into())
    }
}

impl<'de> Deserialize<'de> for RelationshipKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        u8::deserialize(deserializer).map(Self::from)
    }
}

/// A relationship keeps its user cached until the relationship is removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
    pub user_id: Snowflake,
    pub kind: RelationshipKind,
    pub presence: Presence,
}

impl Relationship {
    pub fn new(user_id: Snowflake, kind: RelationshipKind) -> Self {
        Self {
            user_id,
            kind,
            presence: Presence::default(),
        }
    }

    pub fn is_friend(&self) -> bool {
        self.kind == RelationshipKind::Friend
    }
}
