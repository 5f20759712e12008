//! [`Store`] implementation backed by an Airtable base.
//!
//! Record ids double as model ids. Table and field names are discovered once
//! from the metadata API and cached; when discovery fails the configured
//! table names and the first field-name candidates are used instead.
//! Content searches degrade to empty results so a flaky base never blocks a
//! chat reply.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde_json::{Map, Value};
use tokio::sync::OnceCell;
use vetchat_core::models::{
    AnalyticsEvent, CleanupReport, Conversation, DailyUsage, Message, Opportunity, Resource, Role,
    User,
};
use vetchat_core::store::Store;

use super::client::{formula_field, formula_literal, AirtableClient, ListQuery, Record};
use super::schema::{self, fields, resolve_table, ResolvedTable};
use crate::config::AirtableTables;

/// Upper bound on rows pulled by a single cleanup pass per table.
const CLEANUP_SCAN_LIMIT: usize = 1000;

#[derive(Debug)]
struct Tables {
    users: ResolvedTable,
    conversations: ResolvedTable,
    messages: ResolvedTable,
    opportunities: ResolvedTable,
    resources: ResolvedTable,
    usage: ResolvedTable,
    analytics: ResolvedTable,
}

pub struct AirtableStore {
    client: AirtableClient,
    names: AirtableTables,
    tables: OnceCell<Tables>,
}

/// Millisecond precision keeps the two halves of an exchange apart.
fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Within one timestamp a user turn precedes the reply to it.
fn turn_rank(role: Role) -> u8 {
    match role {
        Role::Assistant => 1,
        Role::User | Role::System => 0,
    }
}

fn eq_clause(field: &str, value: &str) -> String {
    format!("{}={}", formula_field(field), formula_literal(value))
}

fn lower_eq_clause(field: &str, value: &str) -> String {
    format!(
        "LOWER({})={}",
        formula_field(field),
        formula_literal(&value.to_lowercase())
    )
}

impl AirtableStore {
    pub fn new(client: AirtableClient, names: AirtableTables) -> Self {
        Self {
            client,
            names,
            tables: OnceCell::new(),
        }
    }

    async fn tables(&self) -> &Tables {
        self.tables
            .get_or_init(|| async {
                let discovered = match self.client.list_tables().await {
                    Ok(tables) => tables,
                    Err(e) => {
                        tracing::warn!(
                            error = %format!("{e:#}"),
                            "Airtable schema discovery failed; using configured names"
                        );
                        Vec::new()
                    }
                };
                let resolve = |name: &str| {
                    if discovered.is_empty() {
                        ResolvedTable::undiscovered(name)
                    } else {
                        resolve_table(&discovered, name)
                    }
                };
                Tables {
                    users: resolve(&self.names.users),
                    conversations: resolve(&self.names.conversations),
                    messages: resolve(&self.names.messages),
                    opportunities: resolve(&self.names.opportunities),
                    resources: resolve(&self.names.resources),
                    usage: resolve(&self.names.usage),
                    analytics: resolve(&self.names.analytics),
                }
            })
            .await
    }

    fn user_from(record: Record) -> User {
        let f = &record.fields;
        User {
            email: schema::text(f, fields::EMAIL).map(|e| e.to_lowercase()),
            name: schema::text(f, fields::NAME),
            subscription_status: schema::text(f, fields::SUBSCRIPTION)
                .unwrap_or_else(|| "free".to_string()),
            is_guest: schema::flag(f, fields::IS_GUEST),
            created_at: schema::timestamp(f, fields::CREATED_AT)
                .or_else(|| record.created_time.as_deref().and_then(schema::parse_timestamp))
                .unwrap_or_else(Utc::now),
            last_active_at: schema::timestamp(f, fields::LAST_ACTIVE),
            id: record.id,
        }
    }

    fn conversation_from(record: Record) -> Conversation {
        let f = &record.fields;
        let created_at = schema::timestamp(f, fields::CREATED_AT)
            .or_else(|| record.created_time.as_deref().and_then(schema::parse_timestamp))
            .unwrap_or_else(Utc::now);
        Conversation {
            user_id: schema::text(f, fields::USER_ID).unwrap_or_default(),
            title: schema::text(f, fields::TITLE).unwrap_or_else(|| "New conversation".into()),
            message_count: schema::number(f, fields::MESSAGE_COUNT)
                .and_then(|n| u32::try_from(n).ok())
                .unwrap_or(0),
            updated_at: schema::timestamp(f, fields::UPDATED_AT).unwrap_or(created_at),
            created_at,
            id: record.id,
        }
    }

    fn message_from(record: Record) -> Message {
        let f = &record.fields;
        Message {
            conversation_id: schema::text(f, fields::CONVERSATION_ID).unwrap_or_default(),
            user_id: schema::text(f, fields::USER_ID).unwrap_or_default(),
            role: schema::text(f, fields::ROLE)
                .map(|r| Role::parse(&r))
                .unwrap_or(Role::User),
            content: schema::text(f, fields::CONTENT).unwrap_or_default(),
            created_at: schema::timestamp(f, fields::MESSAGE_CREATED_AT)
                .or_else(|| record.created_time.as_deref().and_then(schema::parse_timestamp))
                .unwrap_or_else(Utc::now),
            id: record.id,
        }
    }

    fn resource_from(record: Record) -> Resource {
        let f = &record.fields;
        Resource {
            name: schema::text(f, fields::RESOURCE_NAME).unwrap_or_default(),
            category: schema::text(f, fields::CATEGORY),
            description: schema::text(f, fields::DESCRIPTION),
            url: schema::text(f, fields::URL),
            phone: schema::text(f, fields::PHONE),
            id: record.id,
        }
    }

    fn opportunity_from(record: Record) -> Opportunity {
        let f = &record.fields;
        Opportunity {
            title: schema::text(f, fields::TITLE).unwrap_or_default(),
            organization: schema::text(f, fields::ORGANIZATION),
            category: schema::text(f, fields::CATEGORY),
            location: schema::text(f, fields::LOCATION),
            description: schema::text(f, fields::DESCRIPTION),
            url: schema::text(f, fields::URL),
            posted_at: schema::timestamp(f, fields::POSTED_AT),
            id: record.id,
        }
    }

    async fn usage_record(&self, user_id: &str, date: NaiveDate) -> Result<Option<Record>> {
        let t = &self.tables().await.usage;
        let formula = format!(
            "AND({}, DATETIME_FORMAT({}, 'YYYY-MM-DD')={})",
            eq_clause(&t.field(fields::USER_ID), user_id),
            formula_field(&t.field(fields::DATE)),
            formula_literal(&date.format("%Y-%m-%d").to_string())
        );
        let records = self
            .client
            .list_records(
                &t.name,
                &ListQuery {
                    formula: Some(formula),
                    max_records: Some(1),
                    sort: None,
                },
            )
            .await?;
        Ok(records.into_iter().next())
    }
}

#[async_trait]
impl Store for AirtableStore {
    fn backend(&self) -> &'static str {
        "airtable"
    }

    async fn ping(&self) -> Result<()> {
        let t = &self.tables().await.users;
        self.client
            .list_records(
                &t.name,
                &ListQuery {
                    max_records: Some(1),
                    ..ListQuery::default()
                },
            )
            .await?;
        Ok(())
    }

    async fn get_user(&self, id: &str) -> Result<Option<User>> {
        if !id.starts_with("rec") {
            return Ok(None);
        }
        let t = &self.tables().await.users;
        Ok(self.client.get_record(&t.name, id).await?.map(Self::user_from))
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let t = &self.tables().await.users;
        let records = self
            .client
            .list_records(
                &t.name,
                &ListQuery {
                    formula: Some(lower_eq_clause(&t.field(fields::EMAIL), email.trim())),
                    max_records: Some(1),
                    sort: None,
                },
            )
            .await?;
        Ok(records.into_iter().next().map(Self::user_from))
    }

    async fn create_user(&self, user: &User) -> Result<User> {
        let t = &self.tables().await.users;
        let mut f = Map::new();
        if let Some(email) = &user.email {
            f.insert(t.field(fields::EMAIL), Value::from(email.as_str()));
        }
        if let Some(name) = &user.name {
            f.insert(t.field(fields::NAME), Value::from(name.as_str()));
        }
        f.insert(
            t.field(fields::SUBSCRIPTION),
            Value::from(user.subscription_status.as_str()),
        );
        if !t.lacks(fields::IS_GUEST) {
            f.insert(t.field(fields::IS_GUEST), Value::from(user.is_guest));
        }
        if !t.lacks(fields::CREATED_AT) {
            f.insert(t.field(fields::CREATED_AT), Value::from(ts(user.created_at)));
        }
        let record = self.client.create_record(&t.name, f).await?;
        Ok(User {
            id: record.id,
            ..user.clone()
        })
    }

    async fn touch_user(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        let t = &self.tables().await.users;
        if !id.starts_with("rec") || t.lacks(fields::LAST_ACTIVE) {
            return Ok(());
        }
        let mut f = Map::new();
        f.insert(t.field(fields::LAST_ACTIVE), Value::from(ts(at)));
        self.client.update_record(&t.name, id, f).await?;
        Ok(())
    }

    async fn create_conversation(&self, conversation: &Conversation) -> Result<Conversation> {
        let t = &self.tables().await.conversations;
        let mut f = Map::new();
        f.insert(t.field(fields::USER_ID), Value::from(conversation.user_id.as_str()));
        f.insert(t.field(fields::TITLE), Value::from(conversation.title.as_str()));
        f.insert(
            t.field(fields::MESSAGE_COUNT),
            Value::from(conversation.message_count),
        );
        f.insert(t.field(fields::CREATED_AT), Value::from(ts(conversation.created_at)));
        f.insert(t.field(fields::UPDATED_AT), Value::from(ts(conversation.updated_at)));
        let record = self.client.create_record(&t.name, f).await?;
        Ok(Conversation {
            id: record.id,
            ..conversation.clone()
        })
    }

    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        if !id.starts_with("rec") {
            return Ok(None);
        }
        let t = &self.tables().await.conversations;
        Ok(self
            .client
            .get_record(&t.name, id)
            .await?
            .map(Self::conversation_from))
    }

    async fn list_conversations(&self, user_id: &str, limit: usize) -> Result<Vec<Conversation>> {
        let t = &self.tables().await.conversations;
        let records = self
            .client
            .list_records(
                &t.name,
                &ListQuery {
                    formula: Some(eq_clause(&t.field(fields::USER_ID), user_id)),
                    max_records: Some(limit),
                    sort: Some((t.field(fields::UPDATED_AT), true)),
                },
            )
            .await?;
        Ok(records.into_iter().map(Self::conversation_from).collect())
    }

    async fn record_message_activity(
        &self,
        conversation_id: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let Some(current) = self.get_conversation(conversation_id).await? else {
            return Ok(());
        };
        let t = &self.tables().await.conversations;
        let mut f = Map::new();
        // Two messages (user + assistant) per exchange.
        f.insert(
            t.field(fields::MESSAGE_COUNT),
            Value::from(current.message_count.saturating_add(2)),
        );
        f.insert(t.field(fields::UPDATED_AT), Value::from(ts(at)));
        self.client.update_record(&t.name, conversation_id, f).await?;
        Ok(())
    }

    async fn append_message(&self, message: &Message) -> Result<Message> {
        let t = &self.tables().await.messages;
        let mut f = Map::new();
        f.insert(
            t.field(fields::CONVERSATION_ID),
            Value::from(message.conversation_id.as_str()),
        );
        f.insert(t.field(fields::USER_ID), Value::from(message.user_id.as_str()));
        f.insert(t.field(fields::ROLE), Value::from(message.role.as_str()));
        f.insert(t.field(fields::CONTENT), Value::from(message.content.as_str()));
        f.insert(
            t.field(fields::MESSAGE_CREATED_AT),
            Value::from(ts(message.created_at)),
        );
        let record = self.client.create_record(&t.name, f).await?;
        Ok(Message {
            id: record.id,
            ..message.clone()
        })
    }

    async fn recent_messages(&self, conversation_id: &str, limit: usize) -> Result<Vec<Message>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let t = &self.tables().await.messages;
        let records = self
            .client
            .list_records(
                &t.name,
                &ListQuery {
                    formula: Some(eq_clause(&t.field(fields::CONVERSATION_ID), conversation_id)),
                    max_records: Some(limit),
                    sort: Some((t.field(fields::MESSAGE_CREATED_AT), true)),
                },
            )
            .await?;
        let mut messages: Vec<Message> = records.into_iter().map(Self::message_from).collect();
        messages.reverse();
        // Airtable returns rows with equal sort keys in no fixed order.
        messages.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| turn_rank(a.role).cmp(&turn_rank(b.role)))
        });
        Ok(messages)
    }

    async fn search_resources(&self, category: &str, limit: usize) -> Result<Vec<Resource>> {
        let t = &self.tables().await.resources;
        let query = ListQuery {
            formula: Some(lower_eq_clause(&t.field(fields::CATEGORY), category)),
            max_records: Some(limit),
            sort: None,
        };
        match self.client.list_records(&t.name, &query).await {
            Ok(records) => Ok(records.into_iter().map(Self::resource_from).collect()),
            Err(e) => {
                tracing::warn!(category, error = %format!("{e:#}"), "resource search failed");
                Ok(Vec::new())
            }
        }
    }

    async fn search_opportunities(
        &self,
        category: Option<&str>,
        keywords: &[String],
        limit: usize,
    ) -> Result<Vec<Opportunity>> {
        let t = &self.tables().await.opportunities;
        let mut clauses = Vec::new();
        if let Some(category) = category {
            clauses.push(lower_eq_clause(&t.field(fields::CATEGORY), category));
        }
        let haystack = format!(
            "LOWER({}&' '&{})",
            formula_field(&t.field(fields::TITLE)),
            formula_field(&t.field(fields::DESCRIPTION))
        );
        for kw in keywords {
            clauses.push(format!(
                "FIND({}, {haystack})",
                formula_literal(&kw.to_lowercase())
            ));
        }
        if clauses.is_empty() {
            return Ok(Vec::new());
        }
        let query = ListQuery {
            formula: Some(format!("OR({})", clauses.join(", "))),
            max_records: Some(limit),
            sort: None,
        };
        match self.client.list_records(&t.name, &query).await {
            Ok(records) => Ok(records.into_iter().map(Self::opportunity_from).collect()),
            Err(e) => {
                tracing::warn!(error = %format!("{e:#}"), "opportunity search failed");
                Ok(Vec::new())
            }
        }
    }

    async fn daily_usage(&self, user_id: &str, date: NaiveDate) -> Result<Option<DailyUsage>> {
        Ok(self.usage_record(user_id, date).await?.map(|r| DailyUsage {
            user_id: user_id.to_string(),
            date,
            message_count: schema::number(&r.fields, fields::MESSAGE_COUNT)
                .and_then(|n| u32::try_from(n).ok())
                .unwrap_or(0),
        }))
    }

    async fn increment_daily_usage(&self, user_id: &str, date: NaiveDate) -> Result<DailyUsage> {
        let t = &self.tables().await.usage;
        let count_field = t.field(fields::MESSAGE_COUNT);
        let existing = self.usage_record(user_id, date).await?;

        let message_count = match existing {
            Some(record) => {
                let next = schema::number(&record.fields, fields::MESSAGE_COUNT)
                    .and_then(|n| u32::try_from(n).ok())
                    .unwrap_or(0)
                    .saturating_add(1);
                let mut f = Map::new();
                f.insert(count_field, Value::from(next));
                self.client.update_record(&t.name, &record.id, f).await?;
                next
            }
            None => {
                let mut f = Map::new();
                f.insert(t.field(fields::USER_ID), Value::from(user_id));
                f.insert(
                    t.field(fields::DATE),
                    Value::from(date.format("%Y-%m-%d").to_string()),
                );
                f.insert(count_field, Value::from(1));
                self.client.create_record(&t.name, f).await?;
                1
            }
        };

        Ok(DailyUsage {
            user_id: user_id.to_string(),
            date,
            message_count,
        })
    }

    async fn record_event(&self, event: &AnalyticsEvent) -> Result<()> {
        let t = &self.tables().await.analytics;
        let mut f = Map::new();
        f.insert(t.field(fields::USER_ID), Value::from(event.user_id.as_str()));
        f.insert(t.field(fields::EVENT), Value::from(event.kind.as_str()));
        f.insert(t.field(fields::TIER), Value::from(event.tier.as_str()));
        f.insert(t.field(fields::INTENTS), Value::from(event.intents.join(", ")));
        if let Some(provider) = &event.provider {
            f.insert(t.field(fields::PROVIDER), Value::from(provider.as_str()));
        }
        f.insert(t.field(fields::LATENCY_MS), Value::from(event.latency_ms));
        f.insert(t.field(fields::CREATED_AT), Value::from(ts(event.created_at)));
        if let Some(detail) = &event.detail {
            f.insert(t.field(fields::DETAIL), Value::from(detail.as_str()));
        }
        self.client.create_record(&t.name, f).await?;
        Ok(())
    }

    async fn cleanup_before(&self, cutoff: DateTime<Utc>) -> Result<CleanupReport> {
        let tables = self.tables().await;
        let conv = &tables.conversations;
        let stale = self
            .client
            .list_records(
                &conv.name,
                &ListQuery {
                    formula: Some(format!(
                        "IS_BEFORE({}, {})",
                        formula_field(&conv.field(fields::UPDATED_AT)),
                        formula_literal(&ts(cutoff))
                    )),
                    max_records: Some(CLEANUP_SCAN_LIMIT),
                    sort: None,
                },
            )
            .await?;
        if stale.is_empty() {
            return Ok(CleanupReport::default());
        }

        let msgs = &tables.messages;
        let conv_field = msgs.field(fields::CONVERSATION_ID);
        let mut message_ids = Vec::new();
        for batch in stale.chunks(super::client::BATCH_LIMIT) {
            let clauses: Vec<String> = batch
                .iter()
                .map(|c| eq_clause(&conv_field, &c.id))
                .collect();
            let records = self
                .client
                .list_records(
                    &msgs.name,
                    &ListQuery {
                        formula: Some(format!("OR({})", clauses.join(", "))),
                        max_records: None,
                        sort: None,
                    },
                )
                .await?;
            message_ids.extend(records.into_iter().map(|r| r.id));
        }

        let messages_deleted = self.client.delete_records(&msgs.name, &message_ids).await?;
        let conversation_ids: Vec<String> = stale.into_iter().map(|r| r.id).collect();
        let conversations_deleted = self
            .client
            .delete_records(&conv.name, &conversation_ids)
            .await?;

        Ok(CleanupReport {
            conversations_deleted,
            messages_deleted,
        })
    }
}
