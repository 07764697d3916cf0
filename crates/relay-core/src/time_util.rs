//! Wall-clock timestamps.
//!
//! Tag read times are stored as milliseconds since the Unix epoch so they
//! survive a restart through the journal.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::types::Timestamp;

/// Current time as **milliseconds** since Unix epoch.
#[inline]
pub fn now_ms() -> Timestamp {
    let d = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    d.as_millis() as Timestamp
}

/// Milliseconds in `d`, saturating at `u64::MAX`.
#[inline]
pub fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
