//! Hour-of-participation set.
//!
//! An event runs for 24 hours. Each team carries one flag per hour, set the
//! first time one of its tags is read during that hour. Flags are only ever
//! set; the only way to clear them is a full lap reset.

use serde::Serialize;

/// Number of hours tracked per event.
pub const HOURS_PER_EVENT: usize = 24;

/// Fixed-size set of event hours in which a team was on track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(transparent)]
pub struct HourSet([bool; HOURS_PER_EVENT]);

impl HourSet {
    pub fn new() -> Self {
        Self([false; HOURS_PER_EVENT])
    }

    /// Mark `hour` as active.
    ///
    /// Returns `true` if the flag was newly set, `false` if it was already
    /// set or `hour` is outside the event.
    pub fn insert(&mut self, hour: u8) -> bool {
        match self.0.get_mut(hour as usize) {
            Some(slot) if !*slot => {
                *slot = true;
                true
            }
            _ => false,
        }
    }

    pub fn contains(&self, hour: u8) -> bool {
        self.0.get(hour as usize).copied().unwrap_or(false)
    }

    /// Number of active hours.
    pub fn len(&self) -> usize {
        self.0.iter().filter(|h| **h).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Active hours in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        self.0
            .iter()
            .enumerate()
            .filter(|(_, set)| **set)
            .map(|(h, _)| h as u8)
    }

    pub(crate) fn clear(&mut self) {
        self.0 = [false; HOURS_PER_EVENT];
    }
}
