//! Typed error definitions for the relay lap counter.
//!
//! Provides [`RelayError`] for failures outside the per-event path
//! (configuration, gateways, roster import). Registry and journal failures
//! have their own enums in [`registry`](crate::registry) and
//! [`journal`](crate::journal). All variants implement `std::error::Error`
//! via `thiserror`, so they integrate with `anyhow::Result`.

use thiserror::Error;

/// Domain-specific errors for the relay lap counter.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Configuration parsing or validation error.
    #[error("config error: {0}")]
    Config(String),

    /// Roster CSV could not be read or parsed.
    #[error("import error: line {line}: {reason}")]
    Import { line: usize, reason: String },

    /// WebSocket listener or connection error.
    #[error("gateway error: {0}")]
    Gateway(String),

    /// A background task ended abnormally.
    #[error("task error: {0}")]
    Task(String),
}
