//! wikihelper-cli library root.
//!
//! Re-exports the config and chat session modules so integration tests can
//! drive them without going through the command line.

pub mod config;
pub mod session;
