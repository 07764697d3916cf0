//! Team and tag records.

use serde::Serialize;

use super::hours::HourSet;

/// Team identifier. Assigned in insertion order starting at 0, never reused.
pub type TeamId = u32;

/// Identifier encoded on a transponder tag.
pub type TagId = u32;

/// Milliseconds since the Unix epoch.
pub type Timestamp = u64;

/// One relay team.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Team {
    pub team_id: TeamId,
    pub name: String,
    pub leader: String,
    #[serde(rename = "laps")]
    pub lap_count: u32,
    pub hours: HourSet,
    /// Display rank, e.g. `"4 (T)"`. Derived on read, never persisted.
    pub rank: String,
}

impl Team {
    pub fn new(team_id: TeamId, name: impl Into<String>, leader: impl Into<String>) -> Self {
        Self {
            team_id,
            name: name.into(),
            leader: leader.into(),
            lap_count: 0,
            hours: HourSet::new(),
            rank: String::new(),
        }
    }
}

/// A transponder tag, permanently bound to one team.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Tag {
    pub tag_id: TagId,
    pub team_id: TeamId,
    #[serde(rename = "laps")]
    pub lap_count: u32,
    /// `None` until the first accepted read.
    pub last_update: Option<Timestamp>,
}

impl Tag {
    pub fn new(tag_id: TagId, team_id: TeamId) -> Self {
        Self {
            tag_id,
            team_id,
            lap_count: 0,
            last_update: None,
        }
    }
}

/// A validated lap increment, as applied to the registry and recorded in
/// the journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LapIncrement {
    pub tag_id: TagId,
    pub team_id: TeamId,
    /// Hour of the event the lap was run in. `None` for legacy journal
    /// records that did not carry it.
    pub hour: Option<u8>,
    /// Time of the accepted read. `None` leaves `last_update` untouched.
    pub at: Option<Timestamp>,
}
