//! Storage abstraction for vetchat.
//!
//! The [`Store`] trait covers every read and write the request handlers make,
//! so the same pipeline runs against Airtable, SQLite, or the in-memory
//! backend. There are no transactional guarantees across calls: counters and
//! timestamps are updated with separate writes.
//!
//! Implementations must be `Send + Sync` to be shared across handlers.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::models::{
    AnalyticsEvent, CleanupReport, Conversation, DailyUsage, Message, Opportunity, Resource, User,
};

/// Abstract storage backend.
///
/// | Group | Methods |
/// |-------|---------|
/// | Users | [`get_user`](Store::get_user), [`find_user_by_email`](Store::find_user_by_email), [`create_user`](Store::create_user), [`touch_user`](Store::touch_user) |
/// | Conversations | [`create_conversation`](Store::create_conversation), [`get_conversation`](Store::get_conversation), [`list_conversations`](Store::list_conversations), [`record_message_activity`](Store::record_message_activity) |
/// | Messages | [`append_message`](Store::append_message), [`recent_messages`](Store::recent_messages) |
/// | Content | [`search_resources`](Store::search_resources), [`search_opportunities`](Store::search_opportunities) |
/// | Usage | [`daily_usage`](Store::daily_usage), [`increment_daily_usage`](Store::increment_daily_usage), [`record_event`](Store::record_event) |
/// | Maintenance | [`ping`](Store::ping), [`cleanup_before`](Store::cleanup_before) |
#[async_trait]
pub trait Store: Send + Sync {
    /// Short backend label used in logs and readiness output.
    fn backend(&self) -> &'static str;

    /// Cheap connectivity check.
    async fn ping(&self) -> Result<()>;

    async fn get_user(&self, id: &str) -> Result<Option<User>>;

    /// Lookup by email, case-insensitive.
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Persist a new user and return it as stored (backends may assign the id).
    async fn create_user(&self, user: &User) -> Result<User>;

    /// Update `last_active_at`.
    async fn touch_user(&self, id: &str, at: DateTime<Utc>) -> Result<()>;

    async fn create_conversation(&self, conversation: &Conversation) -> Result<Conversation>;

    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>>;

    /// Most recently updated first.
    async fn list_conversations(&self, user_id: &str, limit: usize) -> Result<Vec<Conversation>>;

    /// Refresh `message_count` after messages were appended and set `updated_at`.
    async fn record_message_activity(&self, conversation_id: &str, at: DateTime<Utc>)
        -> Result<()>;

    async fn append_message(&self, message: &Message) -> Result<Message>;

    /// The last `limit` messages of a conversation, oldest first.
    async fn recent_messages(&self, conversation_id: &str, limit: usize) -> Result<Vec<Message>>;

    /// Up to `limit` resources in `category` (case-insensitive), store order.
    async fn search_resources(&self, category: &str, limit: usize) -> Result<Vec<Resource>>;

    /// Up to `limit` opportunities whose category matches or whose title or
    /// description contains any of `keywords`.
    async fn search_opportunities(
        &self,
        category: Option<&str>,
        keywords: &[String],
        limit: usize,
    ) -> Result<Vec<Opportunity>>;

    /// Today's counter, if any row exists.
    async fn daily_usage(&self, user_id: &str, date: NaiveDate) -> Result<Option<DailyUsage>>;

    /// Add one message to the day's counter and return the new value.
    async fn increment_daily_usage(&self, user_id: &str, date: NaiveDate) -> Result<DailyUsage>;

    async fn record_event(&self, event: &AnalyticsEvent) -> Result<()>;

    /// Delete conversations last updated before `cutoff`, and their messages.
    async fn cleanup_before(&self, cutoff: DateTime<Utc>) -> Result<CleanupReport>;
}

/// Lowercased alphanumeric words of at least four letters, used as
/// opportunity search keywords.
pub fn keywords_from(text: &str, max: usize) -> Vec<String> {
    const STOP: &[&str] = &[
        "that", "this", "with", "have", "from", "what", "when", "where", "which", "would",
        "could", "should", "about", "there", "their", "help", "need", "want", "looking",
    ];
    let mut out: Vec<String> = Vec::new();
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .map(|w| w.to_lowercase())
        .filter(|w| w.len() >= 4 && !STOP.contains(&w.as_str()))
    {
        if !out.contains(&word) {
            out.push(word);
        }
        if out.len() >= max {
            break;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keywords_from() {
        let kw = keywords_from("I need help finding a welding job near Tampa, welding!", 5);
        assert_eq!(kw, vec!["finding", "welding", "near", "tampa"]);
    }

    #[test]
    fn test_keywords_capped() {
        let kw = keywords_from("alpha bravo charlie delta echo foxtrot", 3);
        assert_eq!(kw, vec!["alpha", "bravo", "charlie"]);
    }
}
