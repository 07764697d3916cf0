//! Values published by the lap processor after an event is fully applied.

use serde::Serialize;

use super::roster::{TagId, Team, TeamId};

/// One accepted lap, as shown on the live display.
///
/// Serialized as `{"tag_id","team_id","team_laps","team_name","team_rank"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub tag_id: TagId,
    pub team_id: TeamId,
    #[serde(rename = "team_laps")]
    pub team_lap_count: u32,
    pub team_name: String,
    pub team_rank: String,
}

/// Consistent snapshot of every team, with ranks filled in.
///
/// Teams are ordered by team id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Standings {
    pub teams: Vec<Team>,
    pub total_laps: u64,
}

impl Standings {
    pub fn new(teams: Vec<Team>) -> Self {
        let total_laps = teams.iter().map(|t| t.lap_count as u64).sum();
        Self { teams, total_laps }
    }

    pub fn team(&self, team_id: TeamId) -> Option<&Team> {
        self.teams.iter().find(|t| t.team_id == team_id)
    }
}
