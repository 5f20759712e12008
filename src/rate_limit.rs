//! In-process sliding-window rate limiter.
//!
//! Each key owns a queue of hit timestamps. A check prunes timestamps older
//! than the window, rejects when the queue is full, and otherwise records the
//! hit. State lives in this process only: limits reset on restart and are not
//! shared between instances.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Rejection carrying how long until the oldest hit leaves the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimited {
    pub retry_after_secs: u64,
}

#[derive(Default)]
pub struct RateLimiter {
    buckets: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn check(&self, key: &str, limit: u32, window: Duration) -> Result<(), RateLimited> {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets.entry(key.to_string()).or_default();

        while let Some(oldest) = bucket.front() {
            if now.duration_since(*oldest) >= window {
                bucket.pop_front();
            } else {
                break;
            }
        }

        if bucket.len() >= limit as usize {
            let retry_after = bucket
                .front()
                .map(|oldest| window.saturating_sub(now.duration_since(*oldest)))
                .unwrap_or(window);
            // Round up so clients never retry a moment too early.
            let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
            return Err(RateLimited {
                retry_after_secs: secs.max(1),
            });
        }

        bucket.push_back(now);
        Ok(())
    }

    /// Drop buckets whose hits have all aged out. Returns how many were removed.
    pub async fn prune(&self, window: Duration) -> usize {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().await;
        let before = buckets.len();
        buckets.retain(|_, hits| {
            hits.back()
                .is_some_and(|last| now.duration_since(*last) < window)
        });
        before - buckets.len()
    }

    pub async fn tracked_keys(&self) -> usize {
        self.buckets.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    #[tokio::test(start_paused = true)]
    async fn test_allows_up_to_limit() {
        let limiter = RateLimiter::new();
        for _ in 0..3 {
            assert!(limiter.check("user:a", 3, MINUTE).await.is_ok());
        }
        let err = limiter.check("user:a", 3, MINUTE).await.unwrap_err();
        assert_eq!(err.retry_after_secs, 60);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent() {
        let limiter = RateLimiter::new();
        assert!(limiter.check("user:a", 1, MINUTE).await.is_ok());
        assert!(limiter.check("user:a", 1, MINUTE).await.is_err());
        assert!(limiter.check("user:b", 1, MINUTE).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_slides() {
        let limiter = RateLimiter::new();
        assert!(limiter.check("k", 1, MINUTE).await.is_ok());
        tokio::time::advance(Duration::from_secs(45)).await;
        let err = limiter.check("k", 1, MINUTE).await.unwrap_err();
        assert_eq!(err.retry_after_secs, 15);
        tokio::time::advance(Duration::from_secs(15)).await;
        assert!(limiter.check("k", 1, MINUTE).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_prune_drops_idle_buckets() {
        let limiter = RateLimiter::new();
        limiter.check("a", 5, MINUTE).await.unwrap();
        tokio::time::advance(Duration::from_secs(61)).await;
        limiter.check("b", 5, MINUTE).await.unwrap();
        assert_eq!(limiter.prune(MINUTE).await, 1);
        assert_eq!(limiter.tracked_keys().await, 1);
    }
}
