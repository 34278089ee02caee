//! wikihelper-core
//!
//! Pure domain types for the wiki helper: conversations, chat messages,
//! cited references and token usage. No network or database dependency.
//! This is the shared vocabulary of the other crates.

pub mod error;
pub mod models;
