//! Subscription tiers and their static feature/limit table.
//!
//! A tier is resolved from the free-form subscription status string stored
//! on the user record. Anything unrecognised resolves to [`Tier::Free`].

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Premium,
    Founder,
}

/// Feature switches carried by a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TierFeatures {
    pub resource_context: bool,
    pub opportunity_context: bool,
    pub saved_conversations: bool,
    pub advanced_model: bool,
    pub priority_fallback: bool,
}

/// Numeric limits and features for one tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TierConfig {
    pub tier: Tier,
    pub display_name: &'static str,
    /// `None` means unlimited.
    pub daily_message_limit: Option<u32>,
    pub requests_per_minute: u32,
    pub max_message_chars: usize,
    pub history_messages: usize,
    pub context_items: usize,
    pub features: TierFeatures,
}

const FREE: TierConfig = TierConfig {
    tier: Tier::Free,
    display_name: "Free",
    daily_message_limit: Some(10),
    requests_per_minute: 5,
    max_message_chars: 1000,
    history_messages: 4,
    context_items: 3,
    features: TierFeatures {
        resource_context: true,
        opportunity_context: false,
        saved_conversations: false,
        advanced_model: false,
        priority_fallback: false,
    },
};

const PREMIUM: TierConfig = TierConfig {
    tier: Tier::Premium,
    display_name: "Premium",
    daily_message_limit: Some(100),
    requests_per_minute: 20,
    max_message_chars: 4000,
    history_messages: 20,
    context_items: 8,
    features: TierFeatures {
        resource_context: true,
        opportunity_context: true,
        saved_conversations: true,
        advanced_model: true,
        priority_fallback: false,
    },
};

const FOUNDER: TierConfig = TierConfig {
    tier: Tier::Founder,
    display_name: "Founder",
    daily_message_limit: None,
    requests_per_minute: 60,
    max_message_chars: 8000,
    history_messages: 40,
    context_items: 15,
    features: TierFeatures {
        resource_context: true,
        opportunity_context: true,
        saved_conversations: true,
        advanced_model: true,
        priority_fallback: true,
    },
};

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Free, Tier::Premium, Tier::Founder];

    /// Resolve a stored subscription status. Case and surrounding whitespace
    /// are ignored.
    ///
    /// ```rust
    /// use vetchat_core::tier::Tier;
    ///
    /// assert_eq!(Tier::from_status("Active"), Tier::Premium);
    /// assert_eq!(Tier::from_status("founding member"), Tier::Founder);
    /// assert_eq!(Tier::from_status("cancelled"), Tier::Free);
    /// ```
    pub fn from_status(status: &str) -> Tier {
        match status.trim().to_lowercase().as_str() {
            "founder" | "founding member" | "founding_member" | "lifetime" => Tier::Founder,
            "premium" | "active" | "paid" | "pro" | "subscribed" => Tier::Premium,
            _ => Tier::Free,
        }
    }

    pub fn config(self) -> &'static TierConfig {
        match self {
            Tier::Free => &FREE,
            Tier::Premium => &PREMIUM,
            Tier::Founder => &FOUNDER,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Premium => "premium",
            Tier::Founder => "founder",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_status_is_free() {
        assert_eq!(Tier::from_status(""), Tier::Free);
        assert_eq!(Tier::from_status("trial-expired"), Tier::Free);
        assert_eq!(Tier::from_status("  FREE "), Tier::Free);
    }

    #[test]
    fn test_premium_aliases() {
        for status in ["premium", "ACTIVE", " paid", "Pro", "subscribed"] {
            assert_eq!(Tier::from_status(status), Tier::Premium, "{status}");
        }
    }

    #[test]
    fn test_founder_aliases() {
        for status in ["Founder", "founding member", "founding_member", "lifetime"] {
            assert_eq!(Tier::from_status(status), Tier::Founder, "{status}");
        }
    }

    #[test]
    fn test_limits_grow_with_tier() {
        let free = Tier::Free.config();
        let premium = Tier::Premium.config();
        let founder = Tier::Founder.config();
        assert_eq!(free.daily_message_limit, Some(10));
        assert_eq!(premium.daily_message_limit, Some(100));
        assert_eq!(founder.daily_message_limit, None);
        assert!(free.requests_per_minute < premium.requests_per_minute);
        assert!(premium.context_items < founder.context_items);
        assert!(!free.features.opportunity_context);
        assert!(premium.features.opportunity_context);
    }

    #[test]
    fn test_config_carries_its_tier() {
        for tier in Tier::ALL {
            assert_eq!(tier.config().tier, tier);
        }
    }
}
