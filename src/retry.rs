//! Backoff schedule shared by the outbound HTTP clients.
//!
//! 429 and 5xx responses and transport errors are retried; other statuses
//! are final. Delays double from 500ms and stop growing after 2^5 steps.

use std::time::Duration;

use reqwest::StatusCode;

const BASE_DELAY_MS: u64 = 500;

/// Delay before retry number `attempt` (1-based).
pub fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_millis(BASE_DELAY_MS << attempt.saturating_sub(1).min(5))
}

pub fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}
