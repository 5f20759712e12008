//! Daily quota checks and usage/analytics recording.
//!
//! Counters live in the backing store, keyed by user and UTC date. Reads
//! that fail are treated as zero usage; writes that fail are logged and
//! dropped. Check-then-increment is not atomic.

use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::Serialize;
use vetchat_core::intent::Intent;
use vetchat_core::models::AnalyticsEvent;
use vetchat_core::store::Store;
use vetchat_core::tier::TierConfig;

/// Today's quota position for one user.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct QuotaStatus {
    pub used: u32,
    /// `None` for unlimited tiers.
    pub limit: Option<u32>,
    pub remaining: Option<u32>,
    pub reset_at: DateTime<Utc>,
}

impl QuotaStatus {
    pub fn new(used: u32, limit: Option<u32>, now: DateTime<Utc>) -> Self {
        Self {
            used,
            limit,
            remaining: limit.map(|l| l.saturating_sub(used)),
            reset_at: next_reset(now),
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.limit.is_some_and(|l| self.used >= l)
    }
}

/// Next UTC midnight after `now`.
pub fn next_reset(now: DateTime<Utc>) -> DateTime<Utc> {
    let tomorrow = now
        .date_naive()
        .checked_add_days(Days::new(1))
        .unwrap_or(NaiveDate::MAX);
    tomorrow.and_time(chrono::NaiveTime::MIN).and_utc()
}

pub async fn quota_status(
    store: &dyn Store,
    user_id: &str,
    tier: &TierConfig,
    now: DateTime<Utc>,
) -> QuotaStatus {
    let used = match store.daily_usage(user_id, now.date_naive()).await {
        Ok(usage) => usage.map(|u| u.message_count).unwrap_or(0),
        Err(e) => {
            tracing::warn!(user_id, error = %format!("{e:#}"), "usage lookup failed; assuming zero");
            0
        }
    };
    QuotaStatus::new(used, tier.daily_message_limit, now)
}

/// What happened in one chat exchange, for analytics.
pub struct ExchangeRecord<'a> {
    pub user_id: &'a str,
    pub tier: &'a TierConfig,
    pub intents: &'a [Intent],
    pub provider: Option<&'a str>,
    pub latency_ms: u64,
    /// `false` when the reply was a fallback; no quota is consumed then.
    pub succeeded: bool,
    pub detail: Option<String>,
}

/// Bump the counter (on success) and append an analytics event. Returns the
/// new usage count when it was incremented.
pub async fn record_exchange(
    store: &dyn Store,
    record: ExchangeRecord<'_>,
    now: DateTime<Utc>,
) -> Option<u32> {
    let mut new_count = None;
    if record.succeeded {
        match store
            .increment_daily_usage(record.user_id, now.date_naive())
            .await
        {
            Ok(usage) => new_count = Some(usage.message_count),
            Err(e) => tracing::warn!(
                user_id = record.user_id,
                error = %format!("{e:#}"),
                "usage increment failed"
            ),
        }
    }

    let event = AnalyticsEvent {
        user_id: record.user_id.to_string(),
        kind: if record.succeeded {
            "message_sent".to_string()
        } else {
            "llm_failure".to_string()
        },
        tier: record.tier.tier.as_str().to_string(),
        intents: record.intents.iter().map(|i| i.as_str().to_string()).collect(),
        provider: record.provider.map(str::to_string),
        latency_ms: record.latency_ms,
        created_at: now,
        detail: record.detail,
    };
    if let Err(e) = store.record_event(&event).await {
        tracing::warn!(error = %format!("{e:#}"), kind = %event.kind, "analytics write failed");
    }

    new_count
}
