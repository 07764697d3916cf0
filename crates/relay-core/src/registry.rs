//! Team and tag registry.
//!
//! The [`Registry`] trait is the narrow, typed interface the lap processor
//! uses to read and mutate teams and tags. The backing technology is not
//! the processor's concern; [`MemoryRegistry`] keeps everything in maps and
//! relies on the journal for durability.
//!
//! A registry has exactly one owner (the lap processor, or the journal
//! replay at startup). It is never shared across tasks; readers get
//! [`Standings`](crate::types::Standings) snapshots instead.

use std::collections::HashMap;

use ahash::RandomState;
use thiserror::Error;

use crate::rank;
use crate::types::*;

/// Registry failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// No tag with this id has been assigned to a team.
    #[error("unassigned tag {0}")]
    UnassignedTag(TagId),

    #[error("team {0} not found")]
    TeamNotFound(TeamId),

    /// Tags are bound to one team for good.
    #[error("tag {tag_id} already assigned to team {team_id}")]
    TagAlreadyAssigned { tag_id: TagId, team_id: TeamId },

    /// The increment names a team that does not own the tag.
    #[error("tag {tag_id} belongs to team {owner}, not team {claimed}")]
    OwnerMismatch { tag_id: TagId, owner: TeamId, claimed: TeamId },

    /// The backing store rejected a write.
    #[error("storage failure: {0}")]
    Storage(String),
}

/// Column to order [`Registry::list_teams`] by.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortKey {
    #[default]
    TeamId,
    Name,
    Laps,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

/// Typed access to teams and tags.
///
/// Only `Send` is required (not `Sync`) because a registry is owned by a
/// single task and never accessed concurrently.
pub trait Registry: Send {
    /// Create a team and return its id.
    fn insert_team(&mut self, name: &str, leader: &str) -> Result<TeamId, RegistryError>;

    /// Bind `tag_id` to `team_id`.
    fn insert_tag(&mut self, team_id: TeamId, tag_id: TagId) -> Result<(), RegistryError>;

    fn lookup_tag(&self, tag_id: TagId) -> Result<Tag, RegistryError>;

    fn lookup_team(&self, team_id: TeamId) -> Result<Team, RegistryError>;

    /// Credit one lap to the tag and its team, set the hour flag, and move
    /// the tag's last update forward. Returns the updated team.
    fn apply_lap_increment(&mut self, inc: &LapIncrement) -> Result<Team, RegistryError>;

    /// Every team, with ranks filled in, ordered by `key` and `order`.
    fn list_teams(&self, key: SortKey, order: SortOrder) -> Vec<Team>;

    fn tags_for_team(&self, team_id: TeamId) -> Vec<Tag>;

    /// Zero every lap counter and clear every hour set.
    fn reset_all_lap_counts(&mut self) -> Result<(), RegistryError>;

    fn team_count(&self) -> usize;

    fn tag_count(&self) -> usize;
}

/// In-memory registry.
///
/// Teams are stored by index: a team's id is its position in insertion
/// order, which is sound because teams are never removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryRegistry {
    teams: Vec<Team>,
    tags: HashMap<TagId, Tag, RandomState>,
    tags_by_team: HashMap<TeamId, Vec<TagId>, RandomState>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn team_mut(&mut self, team_id: TeamId) -> Result<&mut Team, RegistryError> {
        self.teams
            .get_mut(team_id as usize)
            .ok_or(RegistryError::TeamNotFound(team_id))
    }
}

impl Registry for MemoryRegistry {
    fn insert_team(&mut self, name: &str, leader: &str) -> Result<TeamId, RegistryError> {
        let team_id = TeamId::try_from(self.teams.len())
            .map_err(|_| RegistryError::Storage("team id space exhausted".into()))?;
        self.teams.push(Team::new(team_id, name, leader));
        Ok(team_id)
    }

    fn insert_tag(&mut self, team_id: TeamId, tag_id: TagId) -> Result<(), RegistryError> {
        if team_id as usize >= self.teams.len() {
            return Err(RegistryError::TeamNotFound(team_id));
        }
        if let Some(existing) = self.tags.get(&tag_id) {
            return Err(RegistryError::TagAlreadyAssigned {
                tag_id,
                team_id: existing.team_id,
            });
        }
        self.tags.insert(tag_id, Tag::new(tag_id, team_id));
        self.tags_by_team.entry(team_id).or_default().push(tag_id);
        Ok(())
    }

    fn lookup_tag(&self, tag_id: TagId) -> Result<Tag, RegistryError> {
        self.tags
            .get(&tag_id)
            .cloned()
            .ok_or(RegistryError::UnassignedTag(tag_id))
    }

    fn lookup_team(&self, team_id: TeamId) -> Result<Team, RegistryError> {
        self.teams
            .get(team_id as usize)
            .cloned()
            .ok_or(RegistryError::TeamNotFound(team_id))
    }

    fn apply_lap_increment(&mut self, inc: &LapIncrement) -> Result<Team, RegistryError> {
        // Validate both sides before touching either, so a failure leaves
        // the tag and the team as they were.
        let owner = self
            .tags
            .get(&inc.tag_id)
            .map(|t| t.team_id)
            .ok_or(RegistryError::UnassignedTag(inc.tag_id))?;
        if owner != inc.team_id {
            return Err(RegistryError::OwnerMismatch {
                tag_id: inc.tag_id,
                owner,
                claimed: inc.team_id,
            });
        }
        self.team_mut(inc.team_id)?;

        if let Some(tag) = self.tags.get_mut(&inc.tag_id) {
            tag.lap_count += 1;
            if let Some(at) = inc.at {
                // Never move backwards.
                tag.last_update = Some(tag.last_update.map_or(at, |prev| prev.max(at)));
            }
        }

        let team = self.team_mut(inc.team_id)?;
        team.lap_count += 1;
        if let Some(hour) = inc.hour {
            team.hours.insert(hour);
        }
        Ok(team.clone())
    }

    fn list_teams(&self, key: SortKey, order: SortOrder) -> Vec<Team> {
        let mut teams = self.teams.clone();
        rank::assign_ranks(&mut teams);
        match key {
            SortKey::TeamId => teams.sort_by_key(|t| t.team_id),
            SortKey::Name => teams.sort_by(|a, b| a.name.cmp(&b.name).then(a.team_id.cmp(&b.team_id))),
            SortKey::Laps => teams.sort_by(|a, b| a.lap_count.cmp(&b.lap_count).then(b.team_id.cmp(&a.team_id))),
        }
        if order == SortOrder::Descending {
            teams.reverse();
        }
        teams
    }

    fn tags_for_team(&self, team_id: TeamId) -> Vec<Tag> {
        self.tags_by_team
            .get(&team_id)
            .map(|ids| ids.iter().filter_map(|id| self.tags.get(id).cloned()).collect())
            .unwrap_or_default()
    }

    fn reset_all_lap_counts(&mut self) -> Result<(), RegistryError> {
        for tag in self.tags.values_mut() {
            tag.lap_count = 0;
        }
        for team in &mut self.teams {
            team.lap_count = 0;
            team.hours.clear();
        }
        Ok(())
    }

    fn team_count(&self) -> usize {
        self.teams.len()
    }

    fn tag_count(&self) -> usize {
        self.tags.len()
    }
}
