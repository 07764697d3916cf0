//! Core data types for the relay lap counter.
//!
//! Teams and tags live in the [`Registry`](crate::registry::Registry);
//! notifications and standings are immutable values produced by the lap
//! processor after an event has been fully applied.

pub mod hours;
pub mod notification;
pub mod roster;

pub use hours::*;
pub use notification::*;
pub use roster::*;
