//! Core data models shared by every storage backend and the chat pipeline.
//!
//! These are plain records mirrored from backing-store rows. Timestamps are
//! UTC; ids are opaque strings (UUIDs for locally created rows, record ids
//! for Airtable rows).

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A person talking to the assistant, either registered (by email) or a guest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    /// Raw subscription status string as stored; resolved via [`crate::tier::Tier::from_status`].
    pub subscription_status: String,
    pub is_guest: bool,
    pub created_at: DateTime<Utc>,
    pub last_active_at: Option<DateTime<Utc>>,
}

impl User {
    /// A registered user with a fresh id and the default `free` status.
    pub fn registered(email: &str, name: Option<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            email: Some(email.trim().to_lowercase()),
            name,
            subscription_status: "free".to_string(),
            is_guest: false,
            created_at: Utc::now(),
            last_active_at: None,
        }
    }

    /// An anonymous guest user (embed widget visitors).
    pub fn guest(name: Option<String>) -> Self {
        Self {
            id: format!("guest_{}", uuid::Uuid::new_v4().simple()),
            email: None,
            name,
            subscription_status: "free".to_string(),
            is_guest: true,
            created_at: Utc::now(),
            last_active_at: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Conversation {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub message_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(user_id: &str, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            title: title.into(),
            message_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Ownership is a plain id comparison after fetch.
    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }
}

/// Author of a [`Message`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }

    /// Lenient parse used when reading loosely-typed rows. Unknown values
    /// are treated as user messages.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "assistant" | "ai" | "bot" => Role::Assistant,
            "system" => Role::System,
            _ => Role::User,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub user_id: String,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(conversation_id: &str, user_id: &str, role: Role, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            user_id: user_id.to_string(),
            role,
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

/// A job, training, or education listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Opportunity {
    pub id: String,
    pub title: String,
    pub organization: Option<String>,
    pub category: Option<String>,
    pub location: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub posted_at: Option<DateTime<Utc>>,
}

/// A support service (benefits office, clinic, hotline, ...).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Resource {
    pub id: String,
    pub name: String,
    pub category: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub phone: Option<String>,
}

/// Per-user message counter for one UTC day.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DailyUsage {
    pub user_id: String,
    pub date: NaiveDate,
    pub message_count: u32,
}

/// An analytics row appended after each chat exchange.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalyticsEvent {
    pub user_id: String,
    /// Event kind, e.g. `message_sent` or `llm_failure`.
    pub kind: String,
    pub tier: String,
    pub intents: Vec<String>,
    pub provider: Option<String>,
    pub latency_ms: u64,
    pub created_at: DateTime<Utc>,
    pub detail: Option<String>,
}

/// Result of an age-based cleanup sweep.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct CleanupReport {
    pub conversations_deleted: usize,
    pub messages_deleted: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parse_is_lenient() {
        assert_eq!(Role::parse("Assistant"), Role::Assistant);
        assert_eq!(Role::parse(" bot "), Role::Assistant);
        assert_eq!(Role::parse("system"), Role::System);
        assert_eq!(Role::parse("whatever"), Role::User);
    }

    #[test]
    fn test_registered_user_normalizes_email() {
        let user = User::registered("  Vet@Example.COM ", None);
        assert_eq!(user.email.as_deref(), Some("vet@example.com"));
        assert!(!user.is_guest);
        assert_eq!(user.subscription_status, "free");
    }

    #[test]
    fn test_guest_ids_are_prefixed() {
        let user = User::guest(None);
        assert!(user.id.starts_with("guest_"));
        assert!(user.is_guest);
    }

    #[test]
    fn test_conversation_ownership() {
        let conv = Conversation::new("u1", "Benefits");
        assert!(conv.is_owned_by("u1"));
        assert!(!conv.is_owned_by("u2"));
    }
}
