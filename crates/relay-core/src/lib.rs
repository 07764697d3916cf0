//! # relay-core
//!
//! Core crate for the relay lap counter, providing:
//!
//! - **Types** (`types`): teams, tags, hour sets, notifications, standings
//! - **Configuration** (`config`): JSON config deserialization
//! - **Error types** (`error`): domain-specific `RelayError` via thiserror
//! - **Registry** (`registry`): team/tag store behind the `Registry` trait
//! - **Fields** (`fields`): quoted comma-separated fields for journal and roster
//! - **Journal** (`journal`): buffered write-ahead log with startup replay
//! - **Rank** (`rank`): competition ranking with tie markers
//! - **Deduplication** (`dedup`): minimum lap interval window
//! - **Time utilities** (`time_util`): wall-clock millisecond timestamps
//! - **Logging** (`logging`): tracing-based structured logging

pub mod config;
pub mod dedup;
pub mod error;
pub mod fields;
pub mod journal;
pub mod logging;
pub mod rank;
pub mod registry;
pub mod time_util;
pub mod types;

// Re-export types at crate root for convenience.
pub use types::*;
