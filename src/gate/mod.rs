//! Capability catalogue and the tier gate in front of it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::identity::AccessTier;

/// Provider configurations a caller may ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Haiku,
    Sonnet,
    Opus,
}

impl Capability {
    pub const ALL: [Capability; 3] = [Capability::Haiku, Capability::Sonnet, Capability::Opus];

    pub fn id(self) -> &'static str {
        match self {
            Capability::Haiku => "haiku",
            Capability::Sonnet => "sonnet",
            Capability::Opus => "opus",
        }
    }

    /// Provider model the capability is served by.
    pub fn model(self) -> &'static str {
        match self {
            Capability::Haiku => "claude-3-5-haiku-20241022",
            Capability::Sonnet => "claude-sonnet-4-20250514",
            Capability::Opus => "claude-opus-4-20250514",
        }
    }

    /// Lowest tier allowed to use this capability.
    pub fn required_tier(self) -> AccessTier {
        match self {
            Capability::Haiku => AccessTier::Free,
            Capability::Sonnet => AccessTier::Authenticated,
            Capability::Opus => AccessTier::Premium,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown model '{0}' (expected one of: haiku, sonnet, opus)")]
pub struct UnknownCapability(pub String);

impl FromStr for Capability {
    type Err = UnknownCapability;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Capability::ALL
            .into_iter()
            .find(|c| c.id().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| UnknownCapability(s.to_string()))
    }
}

/// Gate verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Allow,
    Deny { required: AccessTier },
}

/// Decide whether `tier` may use `capability`. `Admin` always passes.
pub fn authorize(capability: Capability, tier: AccessTier) -> Access {
    let required = capability.required_tier();
    if tier == AccessTier::Admin || tier >= required {
        Access::Allow
    } else {
        Access::Deny { required }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_capability_is_open_to_anonymous() {
        assert_eq!(authorize(Capability::Haiku, AccessTier::Free), Access::Allow);
    }

    #[test]
    fn authenticated_capability_needs_a_login() {
        assert_eq!(
            authorize(Capability::Sonnet, AccessTier::Free),
            Access::Deny {
                required: AccessTier::Authenticated
            }
        );
        assert_eq!(
            authorize(Capability::Sonnet, AccessTier::Authenticated),
            Access::Allow
        );
        assert_eq!(authorize(Capability::Sonnet, AccessTier::Premium), Access::Allow);
    }

    #[test]
    fn premium_capability_denies_lower_tiers() {
        for tier in [AccessTier::Free, AccessTier::Authenticated] {
            assert_eq!(
                authorize(Capability::Opus, tier),
                Access::Deny {
                    required: AccessTier::Premium
                }
            );
        }
        assert_eq!(authorize(Capability::Opus, AccessTier::Premium), Access::Allow);
    }

    #[test]
    fn admin_passes_everything() {
        for capability in Capability::ALL {
            assert_eq!(authorize(capability, AccessTier::Admin), Access::Allow);
        }
    }

    #[test]
    fn parse_known_ids_case_insensitively() {
        assert_eq!("haiku".parse::<Capability>().unwrap(), Capability::Haiku);
        assert_eq!("Sonnet".parse::<Capability>().unwrap(), Capability::Sonnet);
        assert_eq!(" OPUS ".parse::<Capability>().unwrap(), Capability::Opus);
    }

    #[test]
    fn parse_unknown_id_fails() {
        let err = "gpt-4o".parse::<Capability>().unwrap_err();
        assert!(err.to_string().contains("gpt-4o"));
    }

    #[test]
    fn every_capability_maps_to_a_model() {
        for capability in Capability::ALL {
            assert!(!capability.model().is_empty());
            assert_eq!(capability.to_string(), capability.id());
        }
    }
}
