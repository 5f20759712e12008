//! Age-based cleanup of stale conversations and periodic housekeeping.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use vetchat_core::models::CleanupReport;
use vetchat_core::store::Store;

use crate::chat::RATE_WINDOW;
use crate::rate_limit::RateLimiter;

pub fn cutoff_for(retention_days: u32, now: DateTime<Utc>) -> DateTime<Utc> {
    now - chrono::Duration::days(i64::from(retention_days))
}

/// Delete conversations idle for more than `retention_days`.
pub async fn run_cleanup(store: &dyn Store, retention_days: u32) -> Result<CleanupReport> {
    let cutoff = cutoff_for(retention_days, Utc::now());
    let report = store.cleanup_before(cutoff).await?;
    tracing::info!(
        backend = store.backend(),
        %cutoff,
        conversations = report.conversations_deleted,
        messages = report.messages_deleted,
        "cleanup sweep finished"
    );
    Ok(report)
}

/// Background task for `serve`: prunes idle rate-limit buckets and, when
/// `retention_days > 0`, runs the cleanup sweep. Failures are logged and the
/// loop keeps going.
pub fn spawn_sweeper(
    store: Arc<dyn Store>,
    limiter: Arc<RateLimiter>,
    interval_secs: u64,
    retention_days: u32,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(60)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let pruned = limiter.prune(RATE_WINDOW).await;
            tracing::debug!(pruned, "rate limiter pruned");
            if retention_days == 0 {
                continue;
            }
            if let Err(e) = run_cleanup(store.as_ref(), retention_days).await {
                tracing::warn!(error = %format!("{e:#}"), "cleanup sweep failed");
            }
        }
    })
}
