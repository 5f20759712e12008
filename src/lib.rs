//! # vetchat
//!
//! A chat assistant API for veterans with tiered subscriptions.
//!
//! Each message runs through a fixed pipeline: tier resolution, rate limit,
//! daily quota, PII masking, keyword intent detection, context retrieval
//! from the backing store, prompt assembly, and an LLM provider chain with
//! fallback. Usage and analytics are recorded afterwards.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌────────────────┐
//! │  Widget  │──▶│  HTTP (axum) │──▶│  Chat pipeline │
//! │ /embed   │   │  sessions    │   │  tier/quota    │
//! └──────────┘   └──────────────┘   └───────┬────────┘
//!                                           │
//!                       ┌───────────────────┼──────────────┐
//!                       ▼                   ▼              ▼
//!                 ┌──────────┐       ┌────────────┐  ┌───────────┐
//!                 │  Store   │       │ LLM chain  │  │ Analytics │
//!                 │ AT/SQLite│       │ OpenAI/... │  │  usage    │
//!                 └──────────┘       └────────────┘  └───────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and environment overrides |
//! | [`server`] | HTTP routes, session extraction, CORS |
//! | [`chat`] | The chat pipeline |
//! | [`context`] | Tier-gated resource and opportunity retrieval |
//! | [`llm`] | Provider clients and the fallback chain |
//! | [`rate_limit`] | Sliding-window limiter |
//! | [`retry`] | Backoff for outbound HTTP |
//! | [`usage`] | Daily quota and analytics recording |
//! | [`token`] | Session JWTs |
//! | [`crypto`] | Message encryption at rest |
//! | [`airtable`] | Airtable client and store |
//! | [`sqlite_store`] | SQLite store |
//! | [`backend`] | Store selection from config |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`embed`] | Embeddable widget |
//! | [`maintenance`] | Cleanup sweep |
//! | [`logging`] | Tracing subscriber setup |
//! | [`error`] | HTTP error contract |
//!
//! Pure logic (tiers, intents, PII, prompts, the `Store` trait) lives in the
//! `vetchat-core` crate.

pub mod airtable;
pub mod backend;
pub mod chat;
pub mod config;
pub mod context;
pub mod crypto;
pub mod db;
pub mod embed;
pub mod error;
pub mod llm;
pub mod logging;
pub mod maintenance;
pub mod migrate;
pub mod rate_limit;
pub mod retry;
pub mod server;
pub mod sqlite_store;
pub mod token;
pub mod usage;
