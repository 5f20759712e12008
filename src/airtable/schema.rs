//! Table discovery and field-name fallbacks.
//!
//! The spreadsheet has accumulated several naming schemes over time
//! (`Email` / `email` / `Email Address`, ...). Each logical field carries an
//! ordered candidate list: reads take the first candidate present on the
//! record, writes use the first candidate that exists in the discovered
//! table schema (or the first candidate when discovery failed).

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{Map, Value};

use super::client::TableSchema;

/// Ordered field-name candidates for one logical field.
pub type Candidates = &'static [&'static str];

pub mod fields {
    use super::Candidates;

    pub const EMAIL: Candidates = &["Email", "email", "Email Address", "User Email"];
    pub const NAME: Candidates = &["Name", "name", "Full Name", "First Name"];
    pub const SUBSCRIPTION: Candidates = &[
        "Subscription Status",
        "subscription_status",
        "subscriptionStatus",
        "Subscription",
        "Tier",
        "Plan",
        "Status",
    ];
    pub const IS_GUEST: Candidates = &["Is Guest", "Guest", "is_guest"];
    pub const CREATED_AT: Candidates = &["Created At", "created_at", "createdAt", "Created"];
    pub const LAST_ACTIVE: Candidates =
        &["Last Active", "last_active_at", "Last Login", "lastLogin"];

    pub const USER_ID: Candidates = &["User ID", "user_id", "userId", "UserId", "User"];
    pub const TITLE: Candidates = &["Title", "title", "Subject", "Job Title"];
    pub const MESSAGE_COUNT: Candidates =
        &["Message Count", "message_count", "messageCount", "Messages", "Count"];
    pub const UPDATED_AT: Candidates = &[
        "Updated At",
        "updated_at",
        "Last Message At",
        "lastMessageAt",
        "Last Modified",
    ];

    pub const CONVERSATION_ID: Candidates =
        &["Conversation ID", "conversation_id", "conversationId", "Conversation"];
    pub const ROLE: Candidates = &["Role", "role", "Sender"];
    pub const CONTENT: Candidates = &["Content", "content", "Message", "Text"];
    pub const MESSAGE_CREATED_AT: Candidates =
        &["Created At", "created_at", "Timestamp", "timestamp"];

    pub const ORGANIZATION: Candidates = &["Organization", "organization", "Company", "Employer"];
    pub const CATEGORY: Candidates = &["Category", "category", "Type"];
    pub const LOCATION: Candidates = &["Location", "location", "City"];
    pub const DESCRIPTION: Candidates = &["Description", "description", "Summary", "Details"];
    pub const URL: Candidates = &["URL", "Url", "url", "Link", "Website", "Apply URL"];
    pub const POSTED_AT: Candidates = &["Posted At", "posted_at", "Date Posted"];
    pub const RESOURCE_NAME: Candidates = &["Name", "name", "Resource Name", "Title"];
    pub const PHONE: Candidates = &["Phone", "phone", "Phone Number"];

    pub const DATE: Candidates = &["Date", "date", "Day"];

    pub const EVENT: Candidates = &["Event", "event", "Event Type"];
    pub const TIER: Candidates = &["Tier", "tier"];
    pub const INTENTS: Candidates = &["Intents", "intents", "Topics"];
    pub const PROVIDER: Candidates = &["Provider", "provider", "Model Provider"];
    pub const LATENCY_MS: Candidates = &["Latency Ms", "latency_ms", "Latency"];
    pub const DETAIL: Candidates = &["Detail", "Details", "Notes"];
}

/// A resolved table: its real name and the field names it has.
#[derive(Debug, Clone, Default)]
pub struct ResolvedTable {
    pub name: String,
    /// Empty when discovery was unavailable.
    pub fields: Vec<String>,
}

impl ResolvedTable {
    pub fn undiscovered(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fields: Vec::new(),
        }
    }

    /// Field name to write/filter with for a logical field.
    pub fn field(&self, candidates: Candidates) -> String {
        candidates
            .iter()
            .find(|c| self.fields.iter().any(|f| f == *c))
            .or_else(|| {
                candidates.iter().find(|c| {
                    self.fields.iter().any(|f| f.eq_ignore_ascii_case(c))
                })
            })
            .map(|c| {
                // Prefer the schema's exact spelling.
                self.fields
                    .iter()
                    .find(|f| f.eq_ignore_ascii_case(c))
                    .cloned()
                    .unwrap_or_else(|| c.to_string())
            })
            .unwrap_or_else(|| candidates[0].to_string())
    }

    /// Whether the schema is known to lack every candidate.
    pub fn lacks(&self, candidates: Candidates) -> bool {
        !self.fields.is_empty()
            && !candidates
                .iter()
                .any(|c| self.fields.iter().any(|f| f.eq_ignore_ascii_case(c)))
    }
}

/// Pick the table for a logical name: exact match, then case-insensitive,
/// then the first table whose name contains the preferred name (or vice
/// versa). Falls back to the preferred name with unknown fields.
pub fn resolve_table(tables: &[TableSchema], preferred: &str) -> ResolvedTable {
    let want = preferred.to_lowercase();
    let found = tables
        .iter()
        .find(|t| t.name == preferred)
        .or_else(|| tables.iter().find(|t| t.name.to_lowercase() == want))
        .or_else(|| {
            tables.iter().find(|t| {
                let name = t.name.to_lowercase();
                name.contains(&want) || want.contains(&name)
            })
        });

    match found {
        Some(t) => ResolvedTable {
            name: t.name.clone(),
            fields: t.fields.iter().map(|f| f.name.clone()).collect(),
        },
        None => {
            tracing::warn!(table = preferred, "table not found in base schema; using configured name");
            ResolvedTable::undiscovered(preferred)
        }
    }
}

/// First candidate value present (and non-null) on a record.
pub fn read<'a>(fields: &'a Map<String, Value>, candidates: Candidates) -> Option<&'a Value> {
    candidates
        .iter()
        .find_map(|c| fields.get(*c).filter(|v| !v.is_null()))
}

/// Loosely-typed text: strings as-is, numbers/bools rendered, arrays yield
/// their first element (linked records, multi-selects).
pub fn text(fields: &Map<String, Value>, candidates: Candidates) -> Option<String> {
    read(fields, candidates).and_then(value_text)
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(items) => items.iter().find_map(value_text),
        Value::Object(obj) => obj.get("name").and_then(value_text),
        Value::Null => None,
    }
}

pub fn number(fields: &Map<String, Value>, candidates: Candidates) -> Option<u64> {
    match read(fields, candidates)? {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().map(|f| f.max(0.0) as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn flag(fields: &Map<String, Value>, candidates: Candidates) -> bool {
    match read(fields, candidates) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => matches!(s.trim().to_lowercase().as_str(), "true" | "yes" | "1"),
        Some(Value::Number(n)) => n.as_u64() == Some(1),
        _ => false,
    }
}

/// Timestamps are stored either as RFC 3339 strings or plain dates.
pub fn timestamp(fields: &Map<String, Value>, candidates: Candidates) -> Option<DateTime<Utc>> {
    let raw = text(fields, candidates)?;
    parse_timestamp(&raw)
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}
