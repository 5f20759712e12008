//! [`Store`] implementation over a local SQLite database.
//!
//! Used for single-instance deployments and development. The schema lives
//! in [`crate::migrate`]; [`SqliteStore::open`] applies it on connect.

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use vetchat_core::models::{
    AnalyticsEvent, CleanupReport, Conversation, DailyUsage, Message, Opportunity, Resource, Role,
    User,
};
use vetchat_core::store::Store;

use crate::{db, migrate};

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

fn from_unix(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
}

fn user_from_row(row: &SqliteRow) -> User {
    User {
        id: row.get("id"),
        email: row.get("email"),
        name: row.get("name"),
        subscription_status: row.get("subscription_status"),
        is_guest: row.get::<i64, _>("is_guest") != 0,
        created_at: from_unix(row.get("created_at")),
        last_active_at: row.get::<Option<i64>, _>("last_active_at").map(from_unix),
    }
}

fn conversation_from_row(row: &SqliteRow) -> Conversation {
    Conversation {
        id: row.get("id"),
        user_id: row.get("user_id"),
        title: row.get("title"),
        message_count: u32::try_from(row.get::<i64, _>("message_count")).unwrap_or(0),
        created_at: from_unix(row.get("created_at")),
        updated_at: from_unix(row.get("updated_at")),
    }
}

impl SqliteStore {
    /// Connect and make sure the schema exists.
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect_path(path)
            .await
            .with_context(|| format!("Failed to open SQLite database: {}", path.display()))?;
        migrate::apply_schema(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn insert_resource(&self, resource: &Resource) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO resources (id, name, category, description, url, phone) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&resource.id)
        .bind(&resource.name)
        .bind(&resource.category)
        .bind(&resource.description)
        .bind(&resource.url)
        .bind(&resource.phone)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_opportunity(&self, opportunity: &Opportunity) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO opportunities (id, title, organization, category, location, description, url, posted_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&opportunity.id)
        .bind(&opportunity.title)
        .bind(&opportunity.organization)
        .bind(&opportunity.category)
        .bind(&opportunity.location)
        .bind(&opportunity.description)
        .bind(&opportunity.url)
        .bind(opportunity.posted_at.map(|t| t.timestamp()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl Store for SqliteStore {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn get_user(&self, id: &str) -> Result<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(user_from_row))
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE lower(email) = ?")
            .bind(email.trim().to_lowercase())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(user_from_row))
    }

    async fn create_user(&self, user: &User) -> Result<User> {
        sqlx::query(
            "INSERT INTO users (id, email, name, subscription_status, is_guest, created_at, last_active_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&user.id)
        .bind(&user.email)
        .bind(&user.name)
        .bind(&user.subscription_status)
        .bind(i64::from(user.is_guest))
        .bind(user.created_at.timestamp())
        .bind(user.last_active_at.map(|t| t.timestamp()))
        .execute(&self.pool)
        .await?;
        Ok(user.clone())
    }

    async fn touch_user(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE users SET last_active_at = ? WHERE id = ?")
            .bind(at.timestamp())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn create_conversation(&self, conversation: &Conversation) -> Result<Conversation> {
        sqlx::query(
            "INSERT INTO conversations (id, user_id, title, message_count, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&conversation.id)
        .bind(&conversation.user_id)
        .bind(&conversation.title)
        .bind(i64::from(conversation.message_count))
        .bind(conversation.created_at.timestamp())
        .bind(conversation.updated_at.timestamp())
        .execute(&self.pool)
        .await?;
        Ok(conversation.clone())
    }

    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        let row = sqlx::query("SELECT * FROM conversations WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(conversation_from_row))
    }

    async fn list_conversations(&self, user_id: &str, limit: usize) -> Result<Vec<Conversation>> {
        let rows = sqlx::query(
            "SELECT * FROM conversations WHERE user_id = ? ORDER BY updated_at DESC, rowid DESC LIMIT ?",
        )
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(conversation_from_row).collect())
    }

    async fn record_message_activity(
        &self,
        conversation_id: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE conversations SET message_count = (SELECT COUNT(*) FROM messages WHERE conversation_id = ?1), updated_at = ?2 WHERE id = ?1",
        )
        .bind(conversation_id)
        .bind(at.timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn append_message(&self, message: &Message) -> Result<Message> {
        sqlx::query(
            r#"
            INSERT INTO messages (id, conversation_id, user_id, role, content, created_at, seq)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6,
                (SELECT COALESCE(MAX(seq), 0) + 1 FROM messages WHERE conversation_id = ?2))
            "#,
        )
        .bind(&message.id)
        .bind(&message.conversation_id)
        .bind(&message.user_id)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(message.created_at.timestamp())
        .execute(&self.pool)
        .await?;
        Ok(message.clone())
    }

    async fn recent_messages(&self, conversation_id: &str, limit: usize) -> Result<Vec<Message>> {
        let rows = sqlx::query(
            "SELECT id, conversation_id, user_id, role, content, created_at FROM messages WHERE conversation_id = ? ORDER BY seq DESC LIMIT ?",
        )
        .bind(conversation_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut messages: Vec<Message> = rows
            .iter()
            .map(|row| Message {
                id: row.get("id"),
                conversation_id: row.get("conversation_id"),
                user_id: row.get("user_id"),
                role: Role::parse(row.get::<&str, _>("role")),
                content: row.get("content"),
                created_at: from_unix(row.get("created_at")),
            })
            .collect();
        messages.reverse();
        Ok(messages)
    }

    async fn search_resources(&self, category: &str, limit: usize) -> Result<Vec<Resource>> {
        let rows = sqlx::query(
            "SELECT * FROM resources WHERE category = ? COLLATE NOCASE ORDER BY rowid LIMIT ?",
        )
        .bind(category)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| Resource {
                id: row.get("id"),
                name: row.get("name"),
                category: row.get("category"),
                description: row.get("description"),
                url: row.get("url"),
                phone: row.get("phone"),
            })
            .collect())
    }

    async fn search_opportunities(
        &self,
        category: Option<&str>,
        keywords: &[String],
        limit: usize,
    ) -> Result<Vec<Opportunity>> {
        let mut clauses = Vec::new();
        if category.is_some() {
            clauses.push("category = ? COLLATE NOCASE".to_string());
        }
        for _ in keywords {
            clauses.push(
                "instr(lower(title || ' ' || COALESCE(description, '')), ?) > 0".to_string(),
            );
        }
        if clauses.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT * FROM opportunities WHERE {} ORDER BY rowid LIMIT ?",
            clauses.join(" OR ")
        );
        let mut query = sqlx::query(&sql);
        if let Some(category) = category {
            query = query.bind(category);
        }
        for kw in keywords {
            query = query.bind(kw.to_lowercase());
        }
        let rows = query.bind(limit as i64).fetch_all(&self.pool).await?;

        Ok(rows
            .iter()
            .map(|row| Opportunity {
                id: row.get("id"),
                title: row.get("title"),
                organization: row.get("organization"),
                category: row.get("category"),
                location: row.get("location"),
                description: row.get("description"),
                url: row.get("url"),
                posted_at: row.get::<Option<i64>, _>("posted_at").map(from_unix),
            })
            .collect())
    }

    async fn daily_usage(&self, user_id: &str, date: NaiveDate) -> Result<Option<DailyUsage>> {
        let count: Option<i64> = sqlx::query_scalar(
            "SELECT message_count FROM daily_usage WHERE user_id = ? AND date = ?",
        )
        .bind(user_id)
        .bind(date.to_string())
        .fetch_optional(&self.pool)
        .await?;
        Ok(count.map(|c| DailyUsage {
            user_id: user_id.to_string(),
            date,
            message_count: u32::try_from(c).unwrap_or(0),
        }))
    }

    async fn increment_daily_usage(&self, user_id: &str, date: NaiveDate) -> Result<DailyUsage> {
        let count: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO daily_usage (user_id, date, message_count) VALUES (?, ?, 1)
            ON CONFLICT(user_id, date) DO UPDATE SET message_count = message_count + 1
            RETURNING message_count
            "#,
        )
        .bind(user_id)
        .bind(date.to_string())
        .fetch_one(&self.pool)
        .await?;
        Ok(DailyUsage {
            user_id: user_id.to_string(),
            date,
            message_count: u32::try_from(count).unwrap_or(0),
        })
    }

    async fn record_event(&self, event: &AnalyticsEvent) -> Result<()> {
        sqlx::query(
            "INSERT INTO analytics_events (user_id, kind, tier, intents, provider, latency_ms, created_at, detail) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&event.user_id)
        .bind(&event.kind)
        .bind(&event.tier)
        .bind(event.intents.join(","))
        .bind(&event.provider)
        .bind(i64::try_from(event.latency_ms).unwrap_or(i64::MAX))
        .bind(event.created_at.timestamp())
        .bind(&event.detail)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn cleanup_before(&self, cutoff: DateTime<Utc>) -> Result<CleanupReport> {
        let mut tx = self.pool.begin().await?;
        let messages = sqlx::query(
            "DELETE FROM messages WHERE conversation_id IN (SELECT id FROM conversations WHERE updated_at < ?)",
        )
        .bind(cutoff.timestamp())
        .execute(&mut *tx)
        .await?;
        let conversations = sqlx::query("DELETE FROM conversations WHERE updated_at < ?")
            .bind(cutoff.timestamp())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(CleanupReport {
            conversations_deleted: conversations.rows_affected() as usize,
            messages_deleted: messages.rows_affected() as usize,
        })
    }
}
