//! Duplicate read suppression.
//!
//! A reader mat sees the same transponder several times as a runner crosses
//! it, and a runner who stands on the mat would otherwise score laps for
//! free. [`LapWindow`] rejects any read of a tag that arrives sooner than the
//! minimum lap interval after that tag's last accepted read.

use std::time::Duration;

use crate::time_util::duration_ms;
use crate::types::Timestamp;

/// Outcome of checking a read against the de-dup window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowVerdict {
    /// Far enough from the previous accepted read (or the first read).
    Accept,
    /// Inside the window; `elapsed_ms` since the last accepted read.
    TooSoon { elapsed_ms: u64 },
}

/// Minimum time between two accepted reads of the same tag.
///
/// Holds no per-tag state; last-update timestamps live on the tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LapWindow {
    min_interval_ms: u64,
}

impl LapWindow {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval_ms: duration_ms(min_interval),
        }
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    /// Check a read at `now` against the tag's `last_update`.
    ///
    /// A tag that was never read is always accepted. A clock reading earlier
    /// than `last_update` counts as zero elapsed.
    #[inline]
    pub fn check(&self, last_update: Option<Timestamp>, now: Timestamp) -> WindowVerdict {
        let Some(last) = last_update else {
            return WindowVerdict::Accept;
        };
        let elapsed_ms = now.saturating_sub(last);
        if elapsed_ms < self.min_interval_ms {
            WindowVerdict::TooSoon { elapsed_ms }
        } else {
            WindowVerdict::Accept
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_read_is_accepted() {
        let w = LapWindow::new(Duration::from_secs(60));
        assert_eq!(w.check(None, 0), WindowVerdict::Accept);
    }

    #[test]
    fn window_boundaries() {
        let w = LapWindow::new(Duration::from_secs(60));
        assert_eq!(w.check(Some(1_000), 31_000), WindowVerdict::TooSoon { elapsed_ms: 30_000 });
        assert_eq!(w.check(Some(1_000), 60_999), WindowVerdict::TooSoon { elapsed_ms: 59_999 });
        assert_eq!(w.check(Some(1_000), 61_000), WindowVerdict::Accept); // exactly the interval
        assert_eq!(w.check(Some(1_000), 62_000), WindowVerdict::Accept);
    }

    #[test]
    fn clock_going_backwards_is_too_soon() {
        let w = LapWindow::new(Duration::from_secs(2));
        assert_eq!(w.check(Some(10_000), 5_000), WindowVerdict::TooSoon { elapsed_ms: 0 });
    }

    #[test]
    fn zero_interval_accepts_everything() {
        let w = LapWindow::new(Duration::ZERO);
        assert_eq!(w.check(Some(5), 5), WindowVerdict::Accept);
    }
}
