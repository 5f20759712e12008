//! SQLite schema for the local backend.
//!
//! Every statement is idempotent, so `vetchat init` can run against an
//! existing database. Timestamps are stored as Unix seconds.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        email TEXT UNIQUE,
        name TEXT,
        subscription_status TEXT NOT NULL DEFAULT 'free',
        is_guest INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL,
        last_active_at INTEGER
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS conversations (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        title TEXT NOT NULL,
        message_count INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS messages (
        id TEXT PRIMARY KEY,
        conversation_id TEXT NOT NULL,
        user_id TEXT NOT NULL,
        role TEXT NOT NULL,
        content TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        seq INTEGER NOT NULL,
        FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS resources (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        category TEXT,
        description TEXT,
        url TEXT,
        phone TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS opportunities (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        organization TEXT,
        category TEXT,
        location TEXT,
        description TEXT,
        url TEXT,
        posted_at INTEGER
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS daily_usage (
        user_id TEXT NOT NULL,
        date TEXT NOT NULL,
        message_count INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (user_id, date)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS analytics_events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id TEXT NOT NULL,
        kind TEXT NOT NULL,
        tier TEXT NOT NULL,
        intents TEXT NOT NULL DEFAULT '',
        provider TEXT,
        latency_ms INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL,
        detail TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_conversations_user ON conversations(user_id, updated_at)",
    "CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id, seq)",
    "CREATE INDEX IF NOT EXISTS idx_resources_category ON resources(category COLLATE NOCASE)",
    "CREATE INDEX IF NOT EXISTS idx_opportunities_category ON opportunities(category COLLATE NOCASE)",
];

pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}
