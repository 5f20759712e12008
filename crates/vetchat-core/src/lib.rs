//! # vetchat core
//!
//! Pure logic shared by the vetchat server: data models, the subscription
//! tier table, keyword intent detection, PII masking, prompt assembly, and
//! the storage trait with an in-memory backend.
//!
//! This crate has no tokio, sqlx, or HTTP dependencies.

pub mod intent;
pub mod models;
pub mod pii;
pub mod prompt;
pub mod store;
pub mod tier;
