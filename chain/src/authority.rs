//! Authorities and the recursive authority checker.
//!
//! An authority is satisfied when the weights of provided keys and
//! satisfied child accounts reach its threshold. The checker walks account
//! references recursively up to a depth limit and remembers which provided
//! keys actually contributed, so transactions carrying irrelevant
//! signatures can be rejected.

use crate::transaction::PermissionLevel;
use cascade_types::PublicKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyWeight {
    pub key: PublicKey,
    pub weight: u16,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountWeight {
    pub permission: PermissionLevel,
    pub weight: u16,
}

/// A weighted-threshold authority over keys and other accounts'
/// permissions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authority {
    pub threshold: u32,
    pub keys: Vec<KeyWeight>,
    pub accounts: Vec<AccountWeight>,
}

impl Default for Authority {
    fn default() -> Self {
        Self { threshold: 1, keys: Vec::new(), accounts: Vec::new() }
    }
}

impl Authority {
    /// A 1-of-1 authority over a single key.
    pub fn single_key(key: PublicKey) -> Self {
        Self {
            threshold: 1,
            keys: vec![KeyWeight { key, weight: 1 }],
            accounts: Vec::new(),
        }
    }
}

/// Evaluates whether provided keys/accounts satisfy permission levels.
///
/// `lookup` resolves a permission level to its authority; it returns
/// `None` for unknown permissions, which simply fail to satisfy.
pub struct AuthorityChecker<F>
where
    F: Fn(&PermissionLevel) -> Option<Authority>,
{
    lookup: F,
    max_depth: u16,
    provided_keys: BTreeSet<PublicKey>,
    provided_accounts: BTreeSet<cascade_types::AccountName>,
    used_keys: BTreeSet<PublicKey>,
}

impl<F> AuthorityChecker<F>
where
    F: Fn(&PermissionLevel) -> Option<Authority>,
{
    pub fn new(
        lookup: F,
        max_depth: u16,
        provided_keys: BTreeSet<PublicKey>,
        provided_accounts: BTreeSet<cascade_types::AccountName>,
    ) -> Self {
        Self {
            lookup,
            max_depth,
            provided_keys,
            provided_accounts,
            used_keys: BTreeSet::new(),
        }
    }

    /// Whether the provided keys/accounts satisfy `level`.
    pub fn satisfied(&mut self, level: &PermissionLevel) -> bool {
        self.satisfied_at(level, 0)
    }

    fn satisfied_at(&mut self, level: &PermissionLevel, depth: u16) -> bool {
        if depth > self.max_depth {
            return false;
        }
        // a provided account vouches for all of its own permissions
        if self.provided_accounts.contains(&level.actor) {
            return true;
        }
        let Some(authority) = (self.lookup)(level) else {
            return false;
        };
        let mut total: u32 = 0;
        for kw in &authority.keys {
            if self.provided_keys.contains(&kw.key) {
                self.used_keys.insert(kw.key);
                total = total.saturating_add(kw.weight as u32);
            }
        }
        if total >= authority.threshold {
            return true;
        }
        for aw in &authority.accounts {
            if self.satisfied_at(&aw.permission, depth + 1) {
                total = total.saturating_add(aw.weight as u32);
                if total >= authority.threshold {
                    return true;
                }
            }
        }
        total >= authority.threshold
    }

    pub fn all_keys_used(&self) -> bool {
        self.used_keys.len() == self.provided_keys.len()
    }

    pub fn used_keys(&self) -> &BTreeSet<PublicKey> {
        &self.used_keys
    }

    pub fn unused_keys(&self) -> BTreeSet<PublicKey> {
        self.provided_keys.difference(&self.used_keys).copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cascade_types::AccountName;
    use std::collections::BTreeMap;

    fn level(actor: &str, permission: &str) -> PermissionLevel {
        PermissionLevel {
            actor: AccountName::new(actor),
            permission: cascade_types::PermissionName::new(permission),
        }
    }

    fn key(n: u8) -> PublicKey {
        PublicKey([n; 32])
    }

    fn checker_over(
        authorities: BTreeMap<PermissionLevel, Authority>,
        keys: &[PublicKey],
    ) -> AuthorityChecker<impl Fn(&PermissionLevel) -> Option<Authority>> {
        AuthorityChecker::new(
            move |l: &PermissionLevel| authorities.get(l).cloned(),
            6,
            keys.iter().copied().collect(),
            BTreeSet::new(),
        )
    }

    #[test]
    fn single_key_satisfies() {
        let mut auths = BTreeMap::new();
        auths.insert(level("alice", "active"), Authority::single_key(key(1)));

        let mut checker = checker_over(auths, &[key(1)]);
        assert!(checker.satisfied(&level("alice", "active")));
        assert!(checker.all_keys_used());
    }

    #[test]
    fn missing_key_fails() {
        let mut auths = BTreeMap::new();
        auths.insert(level("alice", "active"), Authority::single_key(key(1)));

        let mut checker = checker_over(auths, &[key(2)]);
        assert!(!checker.satisfied(&level("alice", "active")));
        assert_eq!(checker.unused_keys().len(), 1);
    }

    #[test]
    fn threshold_requires_enough_weight() {
        let authority = Authority {
            threshold: 3,
            keys: vec![
                KeyWeight { key: key(1), weight: 2 },
                KeyWeight { key: key(2), weight: 1 },
            ],
            accounts: Vec::new(),
        };
        let mut auths = BTreeMap::new();
        auths.insert(level("alice", "active"), authority);

        let mut partial = checker_over(auths.clone(), &[key(1)]);
        assert!(!partial.satisfied(&level("alice", "active")));

        let mut full = checker_over(auths, &[key(1), key(2)]);
        assert!(full.satisfied(&level("alice", "active")));
    }

    #[test]
    fn account_authority_recurses() {
        let mut auths = BTreeMap::new();
        auths.insert(
            level("multisig", "active"),
            Authority {
                threshold: 1,
                keys: Vec::new(),
                accounts: vec![AccountWeight {
                    permission: level("alice", "active"),
                    weight: 1,
                }],
            },
        );
        auths.insert(level("alice", "active"), Authority::single_key(key(1)));

        let mut checker = checker_over(auths, &[key(1)]);
        assert!(checker.satisfied(&level("multisig", "active")));
        assert!(checker.used_keys().contains(&key(1)));
    }

    #[test]
    fn recursion_depth_is_bounded() {
        // a -> a: infinite recursion without the depth limit
        let mut auths = BTreeMap::new();
        auths.insert(
            level("loop", "active"),
            Authority {
                threshold: 1,
                keys: Vec::new(),
                accounts: vec![AccountWeight {
                    permission: level("loop", "active"),
                    weight: 1,
                }],
            },
        );
        let mut checker = checker_over(auths, &[]);
        assert!(!checker.satisfied(&level("loop", "active")));
    }

    #[test]
    fn provided_account_short_circuits() {
        let mut provided = BTreeSet::new();
        provided.insert(AccountName::new("alice"));
        let mut checker = AuthorityChecker::new(
            |_: &PermissionLevel| None,
            6,
            BTreeSet::new(),
            provided,
        );
        assert!(checker.satisfied(&level("alice", "active")));
        assert!(!checker.satisfied(&level("bob", "active")));
    }

    #[test]
    fn irrelevant_keys_are_reported_unused() {
        let mut auths = BTreeMap::new();
        auths.insert(level("alice", "active"), Authority::single_key(key(1)));

        let mut checker = checker_over(auths, &[key(1), key(9)]);
        assert!(checker.satisfied(&level("alice", "active")));
        assert!(!checker.all_keys_used());
        assert_eq!(checker.unused_keys(), [key(9)].into_iter().collect());
    }
}
