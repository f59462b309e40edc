//! Permission computation over cached guild state

use chorus_core::{Channel, Guild, Member, OverwriteKind, Permissions, Role};

/// Guild-level permissions of a member
///
/// The owner holds everything. Everyone else gets the union of the @everyone role and
/// their own roles, folded in position order; ADMINISTRATOR expands to everything.
pub fn base_permissions<'a>(
    guild: &Guild,
    member: &Member,
    roles: impl IntoIterator<Item = &'a Role>,
) -> Permissions {
    if guild.is_owner(member.user_id) {
        return Permissions::ALL;
    }

    let mut applicable: Vec<&Role> = roles
        .into_iter()
        .filter(|role| role.id == guild.default_role_id() || member.has_role(role.id))
        .collect();
    applicable.sort_by_key(|role| (role.position, role.id));

    let permissions = Permissions::combine(applicable.iter().map(|role| role.permissions));
    if permissions.contains(Permissions::ADMINISTRATOR) {
        Permissions::ALL
    } else {
        permissions
    }
}

/// Apply a channel's overwrites on top of guild-level permissions
///
/// Order: the @everyone overwrite, then all of the member's role overwrites combined,
/// then the member's own overwrite. Losing VIEW_CHANNEL loses everything.
pub fn channel_permissions(base: Permissions, guild: &Guild, channel: &Channel, member: &Member) -> Permissions {
    if base.contains(Permissions::ADMINISTRATOR) {
        return Permissions::ALL;
    }

    let mut permissions = base;

    if let Some(everyone) = channel.overwrite_for(guild.default_role_id()) {
        permissions = permissions.apply_overwrite(everyone.allow, everyone.deny);
    }

    let (allow, deny) = channel
        .permission_overwrites
        .iter()
        .filter(|o| o.kind == OverwriteKind::Role && o.id != guild.default_role_id())
        .filter(|o| member.has_role(o.id))
        .fold((Permissions::empty(), Permissions::empty()), |(allow, deny), o| {
            (allow | o.allow, deny | o.deny)
        });
    permissions = permissions.apply_overwrite(allow, deny);

    if let Some(own) = channel
        .permission_overwrites
        .iter()
        .find(|o| o.kind == OverwriteKind::Member && o.id == member.user_id)
    {
        permissions = permissions.apply_overwrite(own.allow, own.deny);
    }

    if permissions.contains(Permissions::VIEW_CHANNEL) {
        permissions
    } else {
        Permissions::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chorus_core::{PermissionOverwrite, Snowflake};

    const GUILD: Snowflake = Snowflake::new(100);
    const OWNER: Snowflake = Snowflake::new(1);
    const USER: Snowflake = Snowflake::new(2);

    fn guild() -> Guild {
        Guild::new(GUILD, "guild", OWNER)
    }

    fn roles() -> Vec<Role> {
        let everyone = Role::everyone(GUILD, Permissions::VIEW_CHANNEL | Permissions::SEND_MESSAGES);
        let mut moderator = Role::new(Snowflake::new(10), GUILD, "mod", Permissions::KICK_MEMBERS);
        moderator.position = 2;
        let mut admin = Role::new(Snowflake::new(11), GUILD, "admin", Permissions::ADMINISTRATOR);
        admin.position = 3;
        vec![everyone, moderator, admin]
    }

    fn member(roles: &[u64]) -> Member {
        let mut member = Member::new(GUILD, USER);
        member.roles = roles.iter().copied().map(Snowflake::new).collect();
        member
    }

    #[test]
    fn test_owner_has_everything() {
        let owner = Member::new(GUILD, OWNER);
        assert_eq!(base_permissions(&guild(), &owner, &roles()), Permissions::ALL);
    }

    #[test]
    fn test_everyone_is_always_included() {
        let perms = base_permissions(&guild(), &member(&[10]), &roles());
        assert_eq!(
            perms,
            Permissions::VIEW_CHANNEL | Permissions::SEND_MESSAGES | Permissions::KICK_MEMBERS
        );

        let perms = base_permissions(&guild(), &member(&[]), &roles());
        assert_eq!(perms, Permissions::VIEW_CHANNEL | Permissions::SEND_MESSAGES);
    }

    #[test]
    fn test_administrator_expands_to_all() {
        assert_eq!(base_permissions(&guild(), &member(&[11]), &roles()), Permissions::ALL);
    }

    #[test]
    fn test_unknown_role_ids_are_ignored() {
        let perms = base_permissions(&guild(), &member(&[999]), &roles());
        assert_eq!(perms, Permissions::VIEW_CHANNEL | Permissions::SEND_MESSAGES);
    }

    #[test]
    fn test_channel_overwrite_order() {
        let mut channel = Channel::new_text(Snowflake::new(50), GUILD, "general");
        channel.permission_overwrites = vec![
            // @everyone cannot send
            PermissionOverwrite {
                id: GUILD,
                kind: OverwriteKind::Role,
                allow: Permissions::empty(),
                deny: Permissions::SEND_MESSAGES,
            },
            // moderators can
            PermissionOverwrite {
                id: Snowflake::new(10),
                kind: OverwriteKind::Role,
                allow: Permissions::SEND_MESSAGES,
                deny: Permissions::empty(),
            },
            // but this particular member cannot attach files
            PermissionOverwrite {
                id: USER,
                kind: OverwriteKind::Member,
                allow: Permissions::empty(),
                deny: Permissions::ATTACH_FILES,
            },
        ];

        let plain = member(&[]);
        let base = base_permissions(&guild(), &plain, &roles());
        let perms = channel_permissions(base, &guild(), &channel, &plain);
        assert!(!perms.contains(Permissions::SEND_MESSAGES));

        let moderator = member(&[10]);
        let base = base_permissions(&guild(), &moderator, &roles());
        let perms = channel_permissions(base | Permissions::ATTACH_FILES, &guild(), &channel, &moderator);
        assert!(perms.contains(Permissions::SEND_MESSAGES));
        assert!(!perms.contains(Permissions::ATTACH_FILES));
    }

    #[test]
    fn test_hidden_channel_grants_nothing() {
        let mut channel = Channel::new_text(Snowflake::new(50), GUILD, "secret");
        channel.permission_overwrites = vec![PermissionOverwrite {
            id: GUILD,
            kind: OverwriteKind::Role,
            allow: Permissions::empty(),
            deny: Permissions::VIEW_CHANNEL,
        }];

        let plain = member(&[]);
        let base = base_permissions(&guild(), &plain, &roles());
        assert_eq!(channel_permissions(base, &guild(), &channel, &plain), Permissions::empty());

        let admin = member(&[11]);
        let base = base_permissions(&guild(), &admin, &roles());
        assert_eq!(channel_permissions(base, &guild(), &channel, &admin), Permissions::ALL);
    }
}
