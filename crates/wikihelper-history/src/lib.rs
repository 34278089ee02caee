//! wikihelper-history
//!
//! Local conversation history. Thin wrapper around a SQLite database.

pub mod error;
pub mod schema;
pub mod store;
