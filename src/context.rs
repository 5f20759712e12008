//! Tier-gated context retrieval for the prompt.
//!
//! No ranking: rows come back in store order and are truncated to the tier's
//! `context_items`. Lookups that fail leave the corresponding list empty.

use vetchat_core::intent::{is_crisis, Intent};
use vetchat_core::models::Resource;
use vetchat_core::prompt::RetrievedContext;
use vetchat_core::store::{keywords_from, Store};
use vetchat_core::tier::TierConfig;

const MAX_KEYWORDS: usize = 5;

pub const CRISIS_RESOURCE_ID: &str = "builtin-veterans-crisis-line";

/// Always surfaced first when a crisis is detected, whatever the store holds.
pub fn crisis_resource() -> Resource {
    Resource {
        id: CRISIS_RESOURCE_ID.to_string(),
        name: "Veterans Crisis Line".to_string(),
        category: Some("Mental Health".to_string()),
        description: Some(
            "Free, confidential support 24/7 for veterans and their families. Dial 988 then press 1, or text 838255."
                .to_string(),
        ),
        url: Some("https://www.veteranscrisisline.net".to_string()),
        phone: Some("988 (press 1)".to_string()),
    }
}

pub async fn retrieve_context(
    store: &dyn Store,
    intents: &[Intent],
    message: &str,
    tier: &TierConfig,
) -> RetrievedContext {
    let limit = tier.context_items;
    let mut context = RetrievedContext::default();

    if is_crisis(intents) {
        context.resources.push(crisis_resource());
    }

    if tier.features.resource_context {
        let mut categories: Vec<&str> = Vec::new();
        for intent in intents {
            let category = intent.resource_category();
            if !categories.contains(&category) {
                categories.push(category);
            }
        }
        for category in categories {
            if context.resources.len() >= limit {
                break;
            }
            match store.search_resources(category, limit).await {
                Ok(found) => {
                    for resource in found {
                        if context.resources.len() >= limit {
                            break;
                        }
                        if !context.resources.iter().any(|r| r.id == resource.id) {
                            context.resources.push(resource);
                        }
                    }
                }
                Err(e) => tracing::warn!(
                    category,
                    error = %format!("{e:#}"),
                    "resource lookup failed; continuing without"
                ),
            }
        }
    }

    if tier.features.opportunity_context {
        let category = intents.iter().find_map(|i| i.opportunity_category());
        let keywords = keywords_from(message, MAX_KEYWORDS);
        if category.is_some() || !keywords.is_empty() {
            match store.search_opportunities(category, &keywords, limit).await {
                Ok(mut found) => {
                    found.truncate(limit);
                    context.opportunities = found;
                }
                Err(e) => tracing::warn!(
                    error = %format!("{e:#}"),
                    "opportunity lookup failed; continuing without"
                ),
            }
        }
    }

    tracing::debug!(
        resources = context.resources.len(),
        opportunities = context.opportunities.len(),
        "context retrieved"
    );
    context
}

#[cfg(test)]
mod tests {
    use super::*;
    use vetchat_core::models::Opportunity;
    use vetchat_core::store::memory::InMemoryStore;
    use vetchat_core::tier::Tier;

    fn resource(id: &str, category: &str) -> Resource {
        Resource {
            id: id.to_string(),
            name: format!("Resource {id}"),
            category: Some(category.to_string()),
            ..Resource::default()
        }
    }

    fn seeded() -> InMemoryStore {
        let store = InMemoryStore::new();
        store
            .seed_resources((0..10).map(|i| resource(&format!("h{i}"), "Housing")))
            .unwrap();
        store
            .seed_resources([resource("m1", "Mental Health")])
            .unwrap();
        store
            .seed_opportunities([Opportunity {
                id: "o1".into(),
                title: "Warehouse Supervisor".into(),
                category: Some("Employment".into()),
                ..Opportunity::default()
            }])
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_free_tier_gets_capped_resources_only() {
        let store = seeded();
        let ctx = retrieve_context(
            &store,
            &[Intent::Housing, Intent::Employment],
            "need housing and a job",
            Tier::Free.config(),
        )
        .await;
        assert_eq!(ctx.resources.len(), 3);
        assert!(ctx.opportunities.is_empty());
    }

    #[tokio::test]
    async fn test_premium_tier_gets_opportunities() {
        let store = seeded();
        let ctx = retrieve_context(
            &store,
            &[Intent::Employment],
            "any supervisor jobs?",
            Tier::Premium.config(),
        )
        .await;
        assert_eq!(ctx.opportunities.len(), 1);
        assert_eq!(ctx.opportunities[0].id, "o1");
    }

    #[tokio::test]
    async fn test_crisis_resource_comes_first() {
        let store = seeded();
        let ctx = retrieve_context(
            &store,
            &[Intent::Crisis, Intent::MentalHealth],
            "I want to end my life",
            Tier::Free.config(),
        )
        .await;
        assert_eq!(ctx.resources[0].id, CRISIS_RESOURCE_ID);
        assert_eq!(ctx.resources[1].id, "m1");
        assert_eq!(ctx.resources.len(), 2);
    }
}
