//! Admin authorization for guild-scoped management commands.

use std::collections::BTreeSet;

use crate::types::{GuildId, UserId};

/// The user performing an action, as described by the dispatcher.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Actor {
    pub user_id: UserId,
    pub guild_id: GuildId,
    pub role_ids: Vec<u64>,
    pub is_guild_owner: bool,
}

/// Process-wide authorization settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdminPolicy {
    /// Members holding this role are admins in every guild.
    pub admin_role_id: Option<u64>,
    /// Bootstrap admin, honoured only while a guild has no admins yet.
    pub bot_owner_id: Option<UserId>,
}

impl AdminPolicy {
    /// Whether `actor` may run admin commands given the guild's admin set.
    pub fn is_admin(&self, actor: &Actor, guild_admins: &BTreeSet<UserId>) -> bool {
        if guild_admins.contains(&actor.user_id) || actor.is_guild_owner {
            return true;
        }
        if self
            .admin_role_id
            .is_some_and(|role| actor.role_ids.contains(&role))
        {
            return true;
        }
        guild_admins.is_empty() && self.bot_owner_id == Some(actor.user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor(user_id: UserId) -> Actor {
        Actor {
            user_id,
            guild_id: 1,
            ..Default::default()
        }
    }

    #[test]
    fn listed_user_is_admin() {
        let admins = BTreeSet::from([5]);
        assert!(AdminPolicy::default().is_admin(&actor(5), &admins));
        assert!(!AdminPolicy::default().is_admin(&actor(6), &admins));
    }

    #[test]
    fn guild_owner_is_admin() {
        let mut owner = actor(9);
        owner.is_guild_owner = true;
        assert!(AdminPolicy::default().is_admin(&owner, &BTreeSet::from([5])));
    }

    #[test]
    fn admin_role_grants_access() {
        let policy = AdminPolicy {
            admin_role_id: Some(77),
            ..Default::default()
        };
        let mut member = actor(9);
        member.role_ids = vec![1, 77];
        assert!(policy.is_admin(&member, &BTreeSet::from([5])));
    }

    #[test]
    fn bot_owner_only_bootstraps_empty_guilds() {
        let policy = AdminPolicy {
            bot_owner_id: Some(42),
            ..Default::default()
        };
        assert!(policy.is_admin(&actor(42), &BTreeSet::new()));
        assert!(!policy.is_admin(&actor(42), &BTreeSet::from([5])));
    }
}
