//! In-memory [`Store`] implementation for development and tests.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock`. Nothing survives a
//! restart. `seed_*` helpers load reference content (resources and
//! opportunities) that would otherwise come from the spreadsheet backend.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::models::{
    AnalyticsEvent, CleanupReport, Conversation, DailyUsage, Message, Opportunity, Resource, User,
};

use super::Store;

/// In-memory store.
#[derive(Default)]
pub struct InMemoryStore {
    users: RwLock<HashMap<String, User>>,
    conversations: RwLock<HashMap<String, Conversation>>,
    messages: RwLock<Vec<Message>>,
    resources: RwLock<Vec<Resource>>,
    opportunities: RwLock<Vec<Opportunity>>,
    usage: RwLock<HashMap<(String, NaiveDate), u32>>,
    events: RwLock<Vec<AnalyticsEvent>>,
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_resources(&self, resources: impl IntoIterator<Item = Resource>) -> Result<()> {
        write(&self.resources)?.extend(resources);
        Ok(())
    }

    pub fn seed_opportunities(
        &self,
        opportunities: impl IntoIterator<Item = Opportunity>,
    ) -> Result<()> {
        write(&self.opportunities)?.extend(opportunities);
        Ok(())
    }

    /// Insert or replace a user as-is (keeps the given id).
    pub fn put_user(&self, user: User) -> Result<()> {
        write(&self.users)?.insert(user.id.clone(), user);
        Ok(())
    }

    /// Snapshot of recorded analytics events.
    pub fn events(&self) -> Result<Vec<AnalyticsEvent>> {
        Ok(read(&self.events)?.clone())
    }

    /// Snapshot of every stored message.
    pub fn all_messages(&self) -> Result<Vec<Message>> {
        Ok(read(&self.messages)?.clone())
    }
}

fn matches_ci(field: Option<&String>, needle: &str) -> bool {
    field.is_some_and(|v| v.eq_ignore_ascii_case(needle))
}

#[async_trait]
impl Store for InMemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> Result<()> {
        read(&self.users).map(|_| ())
    }

    async fn get_user(&self, id: &str) -> Result<Option<User>> {
        Ok(read(&self.users)?.get(id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let needle = email.trim();
        Ok(read(&self.users)?
            .values()
            .find(|u| matches_ci(u.email.as_ref(), needle))
            .cloned())
    }

    async fn create_user(&self, user: &User) -> Result<User> {
        write(&self.users)?.insert(user.id.clone(), user.clone());
        Ok(user.clone())
    }

    async fn touch_user(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        if let Some(user) = write(&self.users)?.get_mut(id) {
            user.last_active_at = Some(at);
        }
        Ok(())
    }

    async fn create_conversation(&self, conversation: &Conversation) -> Result<Conversation> {
        write(&self.conversations)?.insert(conversation.id.clone(), conversation.clone());
        Ok(conversation.clone())
    }

    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        Ok(read(&self.conversations)?.get(id).cloned())
    }

    async fn list_conversations(&self, user_id: &str, limit: usize) -> Result<Vec<Conversation>> {
        let mut list: Vec<Conversation> = read(&self.conversations)?
            .values()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        list.truncate(limit);
        Ok(list)
    }

    async fn record_message_activity(
        &self,
        conversation_id: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let stored = read(&self.messages)?
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .count();
        if let Some(conv) = write(&self.conversations)?.get_mut(conversation_id) {
            conv.message_count = u32::try_from(stored).unwrap_or(u32::MAX);
            conv.updated_at = at;
        }
        Ok(())
    }

    async fn append_message(&self, message: &Message) -> Result<Message> {
        write(&self.messages)?.push(message.clone());
        Ok(message.clone())
    }

    async fn recent_messages(&self, conversation_id: &str, limit: usize) -> Result<Vec<Message>> {
        let all = read(&self.messages)?;
        let matching: Vec<&Message> = all
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .collect();
        let skip = matching.len().saturating_sub(limit);
        Ok(matching.into_iter().skip(skip).cloned().collect())
    }

    async fn search_resources(&self, category: &str, limit: usize) -> Result<Vec<Resource>> {
        Ok(read(&self.resources)?
            .iter()
            .filter(|r| matches_ci(r.category.as_ref(), category))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn search_opportunities(
        &self,
        category: Option<&str>,
        keywords: &[String],
        limit: usize,
    ) -> Result<Vec<Opportunity>> {
        Ok(read(&self.opportunities)?
            .iter()
            .filter(|o| {
                let by_category = category.is_some_and(|c| matches_ci(o.category.as_ref(), c));
                let haystack = format!(
                    "{} {}",
                    o.title.to_lowercase(),
                    o.description.as_deref().unwrap_or("").to_lowercase()
                );
                by_category || keywords.iter().any(|k| haystack.contains(k.as_str()))
            })
            .take(limit)
            .cloned()
            .collect())
    }

    async fn daily_usage(&self, user_id: &str, date: NaiveDate) -> Result<Option<DailyUsage>> {
        Ok(read(&self.usage)?
            .get(&(user_id.to_string(), date))
            .map(|count| DailyUsage {
                user_id: user_id.to_string(),
                date,
                message_count: *count,
            }))
    }

    async fn increment_daily_usage(&self, user_id: &str, date: NaiveDate) -> Result<DailyUsage> {
        let mut usage = write(&self.usage)?;
        let count = usage.entry((user_id.to_string(), date)).or_insert(0);
        *count += 1;
        Ok(DailyUsage {
            user_id: user_id.to_string(),
            date,
            message_count: *count,
        })
    }

    async fn record_event(&self, event: &AnalyticsEvent) -> Result<()> {
        write(&self.events)?.push(event.clone());
        Ok(())
    }

    async fn cleanup_before(&self, cutoff: DateTime<Utc>) -> Result<CleanupReport> {
        let stale: Vec<String> = {
            let mut convs = write(&self.conversations)?;
            let ids: Vec<String> = convs
                .values()
                .filter(|c| c.updated_at < cutoff)
                .map(|c| c.id.clone())
                .collect();
            for id in &ids {
                convs.remove(id);
            }
            ids
        };

        let mut messages = write(&self.messages)?;
        let before = messages.len();
        messages.retain(|m| !stale.contains(&m.conversation_id));

        Ok(CleanupReport {
            conversations_deleted: stale.len(),
            messages_deleted: before - messages.len(),
        })
    }
}
