//! Competition ranking for the leaderboard.
//!
//! Teams are ordered by lap count, highest first. A team's rank is one plus
//! the number of teams with strictly more laps, so tied teams share a rank
//! number. The tie marker `" (T)"` is attached to a team only when its lap
//! count equals the team walked immediately before it: in a group of N tied
//! teams the first one has no marker and the other N−1 do.
//!
//! ```text
//! laps:  10    10      7    5    5       5
//! rank:  "1"   "1 (T)" "3"  "4"  "4 (T)" "4 (T)"
//! ```

use std::cmp::Ordering;

use ahash::AHashMap;

use crate::types::{Team, TeamId};

/// Marker appended to the rank of a team tied with the team before it.
pub const TIE_MARKER: &str = " (T)";

/// Laps descending, team id ascending within a tie.
#[inline]
fn ranking_order(a: (u32, TeamId), b: (u32, TeamId)) -> Ordering {
    b.0.cmp(&a.0).then(a.1.cmp(&b.1))
}

/// Compute the rank string of every team.
pub fn compute_ranks(teams: &[Team]) -> AHashMap<TeamId, String> {
    let mut order: Vec<(u32, TeamId)> = teams.iter().map(|t| (t.lap_count, t.team_id)).collect();
    order.sort_by(|a, b| ranking_order(*a, *b));

    let mut ranks = AHashMap::with_capacity(order.len());
    let mut rank = 0usize;
    let mut prev_laps: Option<u32> = None;

    for (pos, (laps, team_id)) in order.into_iter().enumerate() {
        if prev_laps.is_none_or(|prev| laps < prev) {
            rank = pos + 1;
        }
        let mut label = rank.to_string();
        if prev_laps == Some(laps) {
            label.push_str(TIE_MARKER);
        }
        ranks.insert(team_id, label);
        prev_laps = Some(laps);
    }
    ranks
}

/// Fill in `rank` on every team in place.
pub fn assign_ranks(teams: &mut [Team]) {
    let mut ranks = compute_ranks(teams);
    for team in teams.iter_mut() {
        team.rank = ranks.remove(&team.team_id).unwrap_or_default();
    }
}
