//! Permissions bitflags for guild and channel access control
//!
//! Stored as a 64-bit integer bitfield; the gateway sends it as a decimal string
//! or a plain integer depending on the API version.

use bitflags::bitflags;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

bitflags! {
    /// Guild permission flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Permissions: u64 {
        const CREATE_INSTANT_INVITE = 1 << 0;
        const KICK_MEMBERS          = 1 << 1;
        const BAN_MEMBERS           = 1 << 2;
        /// Bypass all permission checks and channel overwrites
        const ADMINISTRATOR         = 1 << 3;
        const MANAGE_CHANNELS       = 1 << 4;
        const MANAGE_GUILD          = 1 << 5;
        const ADD_REACTIONS         = 1 << 6;
        const VIEW_AUDIT_LOG        = 1 << 7;
        const PRIORITY_SPEAKER      = 1 << 8;
        const STREAM                = 1 << 9;
        /// View channel and read messages
        const VIEW_CHANNEL          = 1 << 10;
        const SEND_MESSAGES         = 1 << 11;
        const SEND_TTS_MESSAGES     = 1 << 12;
        const MANAGE_MESSAGES       = 1 << 13;
        const EMBED_LINKS           = 1 << 14;
        const ATTACH_FILES          = 1 << 15;
        const READ_MESSAGE_HISTORY  = 1 << 16;
        const MENTION_EVERYONE      = 1 << 17;
        const USE_EXTERNAL_EMOJIS   = 1 << 18;
        const CONNECT               = 1 << 20;
        const SPEAK                 = 1 << 21;
        const MUTE_MEMBERS          = 1 << 22;
        const DEAFEN_MEMBERS        = 1 << 23;
        const MOVE_MEMBERS          = 1 << 24;
        const USE_VAD               = 1 << 25;
        const CHANGE_NICKNAME       = 1 << 26;
        const MANAGE_NICKNAMES      = 1 << 27;
        const MANAGE_ROLES          = 1 << 28;
        const MANAGE_WEBHOOKS       = 1 << 29;
        const MANAGE_EMOJIS         = 1 << 30;

        /// Everything a guild owner or administrator holds
        const ALL = Self::CREATE_INSTANT_INVITE.bits()
            | Self::KICK_MEMBERS.bits()
            | Self::BAN_MEMBERS.bits()
            | Self::ADMINISTRATOR.bits()
            | Self::MANAGE_CHANNELS.bits()
            | Self::MANAGE_GUILD.bits()
            | Self::ADD_REACTIONS.bits()
            | Self::VIEW_AUDIT_LOG.bits()
            | Self::PRIORITY_SPEAKER.bits()
            | Self::STREAM.bits()
            | Self::VIEW_CHANNEL.bits()
            | Self::SEND_MESSAGES.bits()
            | Self::SEND_TTS_MESSAGES.bits()
            | Self::MANAGE_MESSAGES.bits()
            | Self::EMBED_LINKS.bits()
            | Self::ATTACH_FILES.bits()
            | Self::READ_MESSAGE_HISTORY.bits()
            | Self::MENTION_EVERYONE.bits()
            | Self::USE_EXTERNAL_EMOJIS.bits()
            | Self::CONNECT.bits()
            | Self::SPEAK.bits()
            | Self::MUTE_MEMBERS.bits()
            | Self::DEAFEN_MEMBERS.bits()
            | Self::MOVE_MEMBERS.bits()
            | Self::USE_VAD.bits()
            | Self::CHANGE_NICKNAME.bits()
            | Self::MANAGE_NICKNAMES.bits()
            | Self::MANAGE_ROLES.bits()
            | Self::MANAGE_WEBHOOKS.bits()
            | Self::MANAGE_EMOJIS.bits();
    }
}

impl Permissions {
    /// Check if the permission set contains a required permission
    ///
    /// Administrators bypass all permission checks.
    #[inline]
    pub fn has(&self, permission: Permissions) -> bool {
        if self.contains(Permissions::ADMINISTRATOR) {
            return true;
        }
        self.contains(permission)
    }

    /// Check if the permission set has any of the given permissions
    #[inline]
    pub fn has_any(&self, permissions: Permissions) -> bool {
        if self.contains(Permissions::ADMINISTRATOR) {
            return true;
        }
        self.intersects(permissions)
    }

    /// Combine permissions from multiple roles
    pub fn combine<I>(roles: I) -> Self
    where
        I: IntoIterator<Item = Permissions>,
    {
        roles.into_iter().fold(Permissions::empty(), |acc, p| acc | p)
    }

    /// Apply a channel overwrite: clear `deny`, then grant `allow`.
    #[inline]
    pub fn apply_overwrite(self, allow: Permissions, deny: Permissions) -> Self {
        (self - deny) | allow
    }

    /// Parse from string representation (decimal number)
    pub fn parse(s: &str) -> Result<Self, std::num::ParseIntError> {
        s.parse::<u64>().map(Permissions::from_bits_truncate)
    }

    /// Names of every individual permission that is set
    pub fn list(&self) -> Vec<&'static str> {
        self.iter_names()
            .filter(|(name, _)| *name != "ALL")
            .map(|(name, _)| name)
            .collect()
    }
}

impl Default for Permissions {
    fn default() -> Self {
        Permissions::empty()
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.bits())
    }
}

impl Serialize for Permissions {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.bits().to_string())
    }
}

// Deserialize from string or number
impl<'de> Deserialize<'de> for Permissions {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::{self, Visitor};

        struct PermissionsVisitor;

        impl Visitor<'_> for PermissionsVisitor {
            type Value = Permissions;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a string or integer representing permission bits")
            }

            fn visit_i64<E>(self, value: i64) -> Result<Permissions, E>
            where
                E: de::Error,
            {
                Ok(Permissions::from_bits_truncate(value as u64))
            }

            fn visit_u64<E>(self, value: u64) -> Result<Permissions, E>
            where
                E: de::Error,
            {
                Ok(Permissions::from_bits_truncate(value))
            }

            fn visit_str<E>(self, value: &str) -> Result<Permissions, E>
            where
                E: de::Error,
            {
                value
                    .parse::<u64>()
                    .map(Permissions::from_bits_truncate)
                    .map_err(|_| de::Error::custom("invalid permissions string"))
            }
        }

        deserializer.deserialize_any(PermissionsVisitor)
    }
}

impl From<u64> for Permissions {
    fn from(bits: u64) -> Self {
        Permissions::from_bits_truncate(bits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_administrator_bypass() {
        let admin = Permissions::ADMINISTRATOR;
        assert!(admin.has(Permissions::VIEW_CHANNEL));
        assert!(admin.has(Permissions::MANAGE_GUILD));
        assert!(admin.has_any(Permissions::BAN_MEMBERS | Permissions::MANAGE_ROLES));
    }

    #[test]
    fn test_has_permission() {
        let perms = Permissions::VIEW_CHANNEL | Permissions::SEND_MESSAGES;
        assert!(perms.has(Permissions::VIEW_CHANNEL));
        assert!(perms.has(Permissions::SEND_MESSAGES));
        assert!(!perms.has(Permissions::MANAGE_GUILD));
        assert!(!Permissions::SPEAK.has_any(perms));
    }

    #[test]
    fn test_combine_permissions() {
        let combined = Permissions::combine([
            Permissions::VIEW_CHANNEL,
            Permissions::SEND_MESSAGES,
            Permissions::MANAGE_GUILD,
        ]);
        assert!(combined.contains(Permissions::VIEW_CHANNEL | Permissions::MANAGE_GUILD));
        assert!(!combined.contains(Permissions::KICK_MEMBERS));
    }

    #[test]
    fn test_apply_overwrite_denies_then_allows() {
        let base = Permissions::VIEW_CHANNEL | Permissions::SEND_MESSAGES;
        let result = base.apply_overwrite(Permissions::ATTACH_FILES, Permissions::SEND_MESSAGES);
        assert_eq!(result, Permissions::VIEW_CHANNEL | Permissions::ATTACH_FILES);

        // allow wins over deny for the same bit
        let result = base.apply_overwrite(Permissions::SEND_MESSAGES, Permissions::SEND_MESSAGES);
        assert!(result.contains(Permissions::SEND_MESSAGES));
    }

    #[test]
    fn test_deserialize_string_or_number() {
        let perms: Permissions = serde_json::from_str("\"3072\"").unwrap();
        assert_eq!(perms, Permissions::VIEW_CHANNEL | Permissions::SEND_MESSAGES);

        let perms: Permissions = serde_json::from_str("8").unwrap();
        assert_eq!(perms, Permissions::ADMINISTRATOR);
    }

    #[test]
    fn test_serialize_json() {
        let perms = Permissions::VIEW_CHANNEL | Permissions::SEND_MESSAGES;
        assert_eq!(serde_json::to_string(&perms).unwrap(), "\"3072\"");
    }

    #[test]
    fn test_list_permissions() {
        let list = (Permissions::VIEW_CHANNEL | Permissions::ADMINISTRATOR).list();
        assert_eq!(list, vec!["ADMINISTRATOR", "VIEW_CHANNEL"]);
        assert!(!Permissions::ALL.list().contains(&"ALL"));
    }
}
