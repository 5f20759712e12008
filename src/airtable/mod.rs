//! Airtable backend: REST client, schema discovery, and the [`Store`]
//! implementation.
//!
//! [`Store`]: vetchat_core::store::Store

pub mod client;
pub mod schema;
mod store;

pub use client::AirtableClient;
pub use store::AirtableStore;
