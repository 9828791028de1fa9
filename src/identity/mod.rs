//! Caller identity: who is asking, and how much they may do.
//!
//! Decoding credentials happens upstream. This module only turns the
//! resulting facts into a rate-limit key and an access tier.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

const ADMIN_ROLE: &str = "admin";
const PREMIUM_ROLE: &str = "premium";

/// Access level of a caller. Ordered from least to most privileged.
///
/// `Admin` sits above every other tier and is also treated as an explicit
/// override by the access gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AccessTier {
    Free,
    Authenticated,
    Premium,
    Admin,
}

impl AccessTier {
    pub fn is_anonymous(self) -> bool {
        self == AccessTier::Free
    }
}

impl fmt::Display for AccessTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AccessTier::Free => "Free",
            AccessTier::Authenticated => "Authenticated",
            AccessTier::Premium => "Premium",
            AccessTier::Admin => "Admin",
        };
        f.write_str(name)
    }
}

/// Rate-limit subject. Anonymous and authenticated callers live in separate
/// namespaces so an address can never collide with a user id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallerKey(String);

impl CallerKey {
    pub fn anonymous(remote_addr: &str) -> Self {
        Self(format!("ip:{remote_addr}"))
    }

    pub fn user(user_id: &str) -> Self {
        Self(format!("user:{user_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the identity provider knows about the current caller.
#[derive(Debug, Clone, Default)]
pub struct IdentityFacts {
    pub authenticated: bool,
    pub roles: HashSet<String>,
    pub user_id: Option<String>,
}

impl IdentityFacts {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            authenticated: true,
            roles: HashSet::new(),
            user_id: Some(user_id.into()),
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.insert(role.into());
        self
    }

    fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r.eq_ignore_ascii_case(role))
    }
}

/// A resolved caller: the key the limiter counts against and the tier the
/// gate checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub key: CallerKey,
    pub tier: AccessTier,
}

/// Resolve identity facts into a [`Caller`].
///
/// An authenticated caller without a stable user id cannot be keyed
/// reliably, so it is treated as anonymous.
pub fn resolve(facts: &IdentityFacts, remote_addr: &str) -> Caller {
    match facts.user_id.as_deref() {
        Some(user_id) if facts.authenticated && !user_id.is_empty() => {
            let tier = if facts.has_role(ADMIN_ROLE) {
                AccessTier::Admin
            } else if facts.has_role(PREMIUM_ROLE) {
                AccessTier::Premium
            } else {
                AccessTier::Authenticated
            };
            Caller {
                key: CallerKey::user(user_id),
                tier,
            }
        }
        _ => Caller {
            key: CallerKey::anonymous(remote_addr),
            tier: AccessTier::Free,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiers_are_totally_ordered() {
        assert!(AccessTier::Free < AccessTier::Authenticated);
        assert!(AccessTier::Authenticated < AccessTier::Premium);
        assert!(AccessTier::Premium < AccessTier::Admin);
    }

    #[test]
    fn anonymous_caller_is_keyed_by_address() {
        let caller = resolve(&IdentityFacts::anonymous(), "203.0.113.7");
        assert_eq!(caller.key.as_str(), "ip:203.0.113.7");
        assert_eq!(caller.tier, AccessTier::Free);
    }

    #[test]
    fn authenticated_caller_is_keyed_by_user() {
        let caller = resolve(&IdentityFacts::user("u-42"), "203.0.113.7");
        assert_eq!(caller.key.as_str(), "user:u-42");
        assert_eq!(caller.tier, AccessTier::Authenticated);
    }

    #[test]
    fn address_and_user_namespaces_never_collide() {
        let anon = resolve(&IdentityFacts::anonymous(), "10.0.0.1");
        let user = resolve(&IdentityFacts::user("10.0.0.1"), "10.0.0.1");
        assert_ne!(anon.key, user.key);
    }

    #[test]
    fn roles_raise_the_tier() {
        let premium = resolve(&IdentityFacts::user("a").with_role("premium"), "x");
        assert_eq!(premium.tier, AccessTier::Premium);

        let admin = resolve(&IdentityFacts::user("b").with_role("Admin"), "x");
        assert_eq!(admin.tier, AccessTier::Admin);

        let both = resolve(
            &IdentityFacts::user("c").with_role("premium").with_role("admin"),
            "x",
        );
        assert_eq!(both.tier, AccessTier::Admin);
    }

    #[test]
    fn authenticated_without_user_id_falls_back_to_anonymous() {
        let facts = IdentityFacts {
            authenticated: true,
            roles: HashSet::from(["admin".to_string()]),
            user_id: None,
        };
        let caller = resolve(&facts, "198.51.100.2");
        assert_eq!(caller.key.as_str(), "ip:198.51.100.2");
        assert_eq!(caller.tier, AccessTier::Free);
    }

    #[test]
    fn unauthenticated_user_id_is_ignored() {
        let facts = IdentityFacts {
            authenticated: false,
            roles: HashSet::new(),
            user_id: Some("u-1".to_string()),
        };
        assert_eq!(resolve(&facts, "1.2.3.4").tier, AccessTier::Free);
    }

    #[test]
    fn tier_display_names() {
        assert_eq!(AccessTier::Authenticated.to_string(), "Authenticated");
        assert!(AccessTier::Free.is_anonymous());
        assert!(!AccessTier::Premium.is_anonymous());
    }
}
