use std::{collections::BTreeSet, fmt, str::FromStr, sync::Arc};

use crate::{
    allowlist::AllowListStore,
    domain::{ChatId, UserId},
    errors::Error,
    Result,
};

// ============== Policy ==============

/// Who may use the general bot commands.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AuthPolicy {
    /// Only the owner.
    OwnerOnly,
    /// The owner, or anyone inside one of the configured groups.
    OwnerOrFixedGroups,
    /// The owner, allow-listed senders, or anyone inside a configured group.
    #[default]
    OwnerOrAllowlistOrGroups,
    /// The owner, or anyone inside the first configured group.
    OwnerOrExactGroup,
}

impl AuthPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            AuthPolicy::OwnerOnly => "owner_only",
            AuthPolicy::OwnerOrFixedGroups => "owner_or_fixed_groups",
            AuthPolicy::OwnerOrAllowlistOrGroups => "owner_or_allowlist_or_groups",
            AuthPolicy::OwnerOrExactGroup => "owner_or_exact_group",
        }
    }

    pub fn uses_allowlist(self) -> bool {
        matches!(self, AuthPolicy::OwnerOrAllowlistOrGroups)
    }
}

impl fmt::Display for AuthPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "owner_only" => Ok(AuthPolicy::OwnerOnly),
            "owner_or_fixed_groups" => Ok(AuthPolicy::OwnerOrFixedGroups),
            "owner_or_allowlist_or_groups" => Ok(AuthPolicy::OwnerOrAllowlistOrGroups),
            "owner_or_exact_group" => Ok(AuthPolicy::OwnerOrExactGroup),
            other => Err(Error::Config(format!("unknown AUTH_POLICY: {other}"))),
        }
    }
}

// ============== Authorization ==============

/// Pure authorization decision.
///
/// `allowlist` is only consulted by [`AuthPolicy::OwnerOrAllowlistOrGroups`].
pub fn is_permitted(
    policy: AuthPolicy,
    owner: Option<UserId>,
    allowed_groups: &[i64],
    allowlist: &BTreeSet<i64>,
    sender: Option<UserId>,
    chat: ChatId,
) -> bool {
    if sender.is_some() && sender == owner {
        return true;
    }

    match policy {
        AuthPolicy::OwnerOnly => false,
        AuthPolicy::OwnerOrFixedGroups => allowed_groups.contains(&chat.0),
        AuthPolicy::OwnerOrAllowlistOrGroups => {
            sender.is_some_and(|u| allowlist.contains(&u.0)) || allowed_groups.contains(&chat.0)
        }
        AuthPolicy::OwnerOrExactGroup => allowed_groups.first() == Some(&chat.0),
    }
}

/// Decides whether a sender/chat pair may proceed. Never talks to the user.
pub struct AuthorizationGate {
    policy: AuthPolicy,
    owner: Option<UserId>,
    allowed_groups: Vec<i64>,
    store: Arc<dyn AllowListStore>,
}

impl AuthorizationGate {
    pub fn new(
        policy: AuthPolicy,
        owner: Option<i64>,
        allowed_groups: Vec<i64>,
        store: Arc<dyn AllowListStore>,
    ) -> Self {
        Self {
            policy,
            owner: owner.map(UserId),
            allowed_groups,
            store,
        }
    }

    pub fn policy(&self) -> AuthPolicy {
        self.policy
    }

    pub fn store(&self) -> &Arc<dyn AllowListStore> {
        &self.store
    }

    pub fn is_owner(&self, sender: Option<UserId>) -> bool {
        sender.is_some() && sender == self.owner
    }

    /// Loads the allow-list only when the policy needs it.
    pub async fn is_authorized(&self, sender: Option<UserId>, chat: ChatId) -> Result<bool> {
        let allowlist = if self.policy.uses_allowlist() && !self.is_owner(sender) {
            self.store.load().await?
        } else {
            BTreeSet::new()
        };

        Ok(is_permitted(
            self.policy,
            self.owner,
            &self.allowed_groups,
            &allowlist,
            sender,
            chat,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allowlist::MemoryAllowList;

    const OWNER: i64 = 7447651332;
    const GROUP: i64 = -1002432150473;
    const OTHER_GROUP: i64 = -100555;

    const ALL: [AuthPolicy; 4] = [
        AuthPolicy::OwnerOnly,
        AuthPolicy::OwnerOrFixedGroups,
        AuthPolicy::OwnerOrAllowlistOrGroups,
        AuthPolicy::OwnerOrExactGroup,
    ];

    fn gate(policy: AuthPolicy, allowlist: &[i64]) -> AuthorizationGate {
        AuthorizationGate::new(
            policy,
            Some(OWNER),
            vec![GROUP, OTHER_GROUP],
            Arc::new(MemoryAllowList::new(allowlist.iter().copied())),
        )
    }

    #[tokio::test]
    async fn owner_is_always_permitted() {
        for policy in ALL {
            let g = gate(policy, &[]);
            for chat in [OWNER, GROUP, 42, -1] {
                assert!(
                    g.is_authorized(Some(UserId(OWNER)), ChatId(chat)).await.unwrap(),
                    "{policy} chat {chat}"
                );
            }
        }
    }

    #[tokio::test]
    async fn strangers_are_denied_everywhere() {
        for policy in ALL {
            let g = gate(policy, &[999]);
            assert!(!g.is_authorized(Some(UserId(12)), ChatId(12)).await.unwrap(), "{policy}");
            assert!(!g.is_authorized(None, ChatId(-77)).await.unwrap(), "{policy}");
        }
    }

    #[tokio::test]
    async fn allowlist_only_counts_for_its_policy() {
        let sender = Some(UserId(555));
        let chat = ChatId(555);
        assert!(gate(AuthPolicy::OwnerOrAllowlistOrGroups, &[555])
            .is_authorized(sender, chat)
            .await
            .unwrap());
        assert!(!gate(AuthPolicy::OwnerOnly, &[555])
            .is_authorized(sender, chat)
            .await
            .unwrap());
        assert!(!gate(AuthPolicy::OwnerOrFixedGroups, &[555])
            .is_authorized(sender, chat)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn group_rules() {
        let sender = Some(UserId(1));
        assert!(gate(AuthPolicy::OwnerOrFixedGroups, &[])
            .is_authorized(sender, ChatId(OTHER_GROUP))
            .await
            .unwrap());
        assert!(gate(AuthPolicy::OwnerOrExactGroup, &[])
            .is_authorized(sender, ChatId(GROUP))
            .await
            .unwrap());
        assert!(!gate(AuthPolicy::OwnerOrExactGroup, &[])
            .is_authorized(sender, ChatId(OTHER_GROUP))
            .await
            .unwrap());
        assert!(!gate(AuthPolicy::OwnerOnly, &[])
            .is_authorized(sender, ChatId(GROUP))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn missing_owner_never_matches_missing_sender() {
        let g = AuthorizationGate::new(
            AuthPolicy::OwnerOnly,
            None,
            vec![],
            Arc::new(MemoryAllowList::default()),
        );
        assert!(!g.is_owner(None));
        assert!(!g.is_authorized(None, ChatId(1)).await.unwrap());
    }

    #[test]
    fn policy_names_round_trip() {
        for policy in ALL {
            assert_eq!(policy.as_str().parse::<AuthPolicy>().unwrap(), policy);
        }
        assert!("OWNER_ONLY".parse::<AuthPolicy>().is_ok());
        assert!("nobody".parse::<AuthPolicy>().is_err());
    }
}
