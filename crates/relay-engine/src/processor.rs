//! Lap processor: the single writer of the registry and the journal.
//!
//! Tag reads arrive on one bounded intake queue and are handled strictly in
//! order. Each read is resolved, checked against the event hour and the
//! de-dup window, journaled, then applied. Only a fully applied lap produces
//! a standings snapshot and a [`Notification`].

use std::sync::Arc;
use std::time::Duration;

use relay_core::dedup::{LapWindow, WindowVerdict};
use relay_core::journal::{Journal, JournalError, JournalRecord};
use relay_core::registry::{Registry, RegistryError, SortKey, SortOrder};
use relay_core::time_util::now_ms;
use relay_core::types::*;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::ShutdownReceiver;
use crate::hub::HubHandle;

/// Why a tag read did not become a lap.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LapError {
    #[error("unassigned tag {0}")]
    UnassignedTag(TagId),

    /// No event hour has been delivered yet.
    #[error("event not started, read ignored")]
    NotStarted,

    #[error("duplicate read of tag {tag_id} ({elapsed_ms} ms since last lap)")]
    DuplicateRead { tag_id: TagId, elapsed_ms: u64 },

    /// The journal refused the record. Nothing was applied.
    #[error("journal append failed: {0}")]
    Storage(String),

    /// The registry rejected a lap the journal already holds.
    #[error("registry diverged from journal: {0}")]
    Fatal(String),
}

impl LapError {
    /// Whether the processor must stop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, LapError::Fatal(_))
    }
}

/// Failures of the journaled roster operations.
#[derive(Debug, Error)]
pub enum AdminError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Journal(#[from] JournalError),
}

/// What [`LapProcessor::run`] hands back when it stops.
pub struct ProcessorExit<R> {
    pub registry: R,
    /// Still holds unflushed records; the owner closes it.
    pub journal: Journal,
    /// Set when the processor stopped on [`LapError::Fatal`].
    pub fatal: Option<LapError>,
}

pub struct LapProcessor<R: Registry> {
    registry: R,
    journal: Journal,
    window: LapWindow,
    standings_tx: watch::Sender<Arc<Standings>>,
    accepted: u64,
    rejected: u64,
}

impl<R: Registry> LapProcessor<R> {
    /// Take ownership of a (replayed) registry and an open journal.
    pub fn new(registry: R, journal: Journal, min_interval: Duration) -> Self {
        let initial = Arc::new(snapshot(&registry));
        let (standings_tx, _) = watch::channel(initial);
        Self {
            registry,
            journal,
            window: LapWindow::new(min_interval),
            standings_tx,
            accepted: 0,
            rejected: 0,
        }
    }

    /// Receiver for standings snapshots. Each value is complete and
    /// consistent; a new one is published after every applied mutation.
    pub fn standings(&self) -> watch::Receiver<Arc<Standings>> {
        self.standings_tx.subscribe()
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    /// Write every pending journal record.
    pub fn flush_journal(&mut self) -> Result<(), JournalError> {
        self.journal.flush()
    }

    /// Close the journal and hand back the registry, for callers that stop
    /// before [`LapProcessor::run`].
    pub fn close(self) -> Result<R, JournalError> {
        self.journal.close()?;
        Ok(self.registry)
    }

    /// Handle one tag read at `now` during `hour`.
    pub fn handle_read(
        &mut self,
        tag_id: TagId,
        hour: Option<u8>,
        now: Timestamp,
    ) -> Result<Notification, LapError> {
        let tag = self.registry.lookup_tag(tag_id).map_err(|e| match e {
            RegistryError::UnassignedTag(id) => LapError::UnassignedTag(id),
            other => LapError::Storage(other.to_string()),
        })?;

        let Some(hour) = hour else {
            return Err(LapError::NotStarted);
        };

        if let WindowVerdict::TooSoon { elapsed_ms } = self.window.check(tag.last_update, now) {
            return Err(LapError::DuplicateRead { tag_id, elapsed_ms });
        }

        let inc = LapIncrement {
            tag_id,
            team_id: tag.team_id,
            hour: Some(hour),
            at: Some(now),
        };
        let record = JournalRecord::IncrementLap {
            tag_id,
            hour: inc.hour,
            at: inc.at,
        };
        self.journal
            .append(&record)
            .map_err(|e| LapError::Storage(e.to_string()))?;

        let team = self
            .registry
            .apply_lap_increment(&inc)
            .map_err(|e| LapError::Fatal(e.to_string()))?;

        let standings = self.publish_standings();
        let team_rank = standings
            .team(team.team_id)
            .map(|t| t.rank.clone())
            .unwrap_or_default();

        Ok(Notification {
            tag_id,
            team_id: team.team_id,
            team_lap_count: team.lap_count,
            team_name: team.name,
            team_rank,
        })
    }

    /// Create a team. The record is journaled before the team exists.
    pub fn add_team(&mut self, name: &str, leader: &str) -> Result<TeamId, AdminError> {
        self.journal.append(&JournalRecord::AddTeam {
            name: name.to_string(),
            leader: leader.to_string(),
        })?;
        let team_id = self.registry.insert_team(name, leader)?;
        self.publish_standings();
        debug!("[processor] team {team_id} {name:?} added");
        Ok(team_id)
    }

    /// Bind a tag to a team.
    pub fn add_tag(&mut self, team_id: TeamId, tag_id: TagId) -> Result<(), AdminError> {
        // Check first so a refused binding never reaches the journal.
        self.registry.lookup_team(team_id)?;
        if let Ok(existing) = self.registry.lookup_tag(tag_id) {
            return Err(RegistryError::TagAlreadyAssigned {
                tag_id,
                team_id: existing.team_id,
            }
            .into());
        }
        self.journal.append(&JournalRecord::AddTag { team_id, tag_id })?;
        self.registry.insert_tag(team_id, tag_id)?;
        Ok(())
    }

    /// Bind every tag in `first..=last` to a team. Returns the number bound.
    ///
    /// Stops at the first failure; tags bound before it stay bound.
    pub fn add_tag_range(&mut self, team_id: TeamId, first: TagId, last: TagId) -> Result<usize, AdminError> {
        let (lo, hi) = if first <= last { (first, last) } else { (last, first) };
        let mut bound = 0;
        for tag_id in lo..=hi {
            self.add_tag(team_id, tag_id)?;
            bound += 1;
        }
        debug!(
            "[processor] team {team_id} holds {} tag(s)",
            self.registry.tags_for_team(team_id).len()
        );
        Ok(bound)
    }

    /// Zero every lap counter and clear every hour set.
    pub fn reset_laps(&mut self) -> Result<(), AdminError> {
        self.journal.append(&JournalRecord::ZeroAllLaps)?;
        self.registry.reset_all_lap_counts()?;
        self.publish_standings();
        info!("[processor] all lap counts reset");
        Ok(())
    }

    fn publish_standings(&self) -> Arc<Standings> {
        let standings = Arc::new(snapshot(&self.registry));
        self.standings_tx.send_replace(Arc::clone(&standings));
        standings
    }

    /// Drain the intake queue until shutdown, a closed intake, or a fatal
    /// error.
    pub async fn run(
        mut self,
        mut intake: mpsc::Receiver<TagId>,
        mut hour_rx: watch::Receiver<Option<u8>>,
        hub: HubHandle,
        mut shutdown: ShutdownReceiver,
    ) -> ProcessorExit<R> {
        info!(
            "[processor] started: {} team(s), {} tag(s), min lap interval {:?}",
            self.registry.team_count(),
            self.registry.tag_count(),
            self.window.min_interval()
        );

        let mut fatal = None;
        let mut current_hour = *hour_rx.borrow_and_update();

        if !*shutdown.borrow() {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        info!("[processor] shutdown signal received");
                        break;
                    }
                    read = intake.recv() => {
                        let Some(tag_id) = read else {
                            info!("[processor] intake closed");
                            break;
                        };

                        let hour = *hour_rx.borrow_and_update();
                        if hour != current_hour {
                            info!("[processor] event hour is now {hour:?}");
                            current_hour = hour;
                        }

                        match self.handle_read(tag_id, hour, now_ms()) {
                            Ok(notif) => {
                                self.accepted += 1;
                                debug!(
                                    "[processor] lap: tag {} team {} now {} ({})",
                                    notif.tag_id, notif.team_id, notif.team_lap_count, notif.team_rank
                                );
                                if !hub.publish(notif).await {
                                    warn!("[processor] hub stopped, notification dropped");
                                }
                            }
                            Err(e) if e.is_fatal() => {
                                error!("[processor] {e}, stopping");
                                fatal = Some(e);
                                break;
                            }
                            Err(e) => {
                                self.rejected += 1;
                                match e {
                                    LapError::UnassignedTag(_) => warn!("[processor] {e}"),
                                    LapError::Storage(_) => error!("[processor] {e}, read dropped"),
                                    _ => info!("[processor] {e}"),
                                }
                            }
                        }
                    }
                }
            }
        }

        info!(
            "[processor] stopped: {} lap(s) accepted, {} read(s) rejected",
            self.accepted, self.rejected
        );
        ProcessorExit {
            registry: self.registry,
            journal: self.journal,
            fatal,
        }
    }
}

fn snapshot<R: Registry + ?Sized>(registry: &R) -> Standings {
    Standings::new(registry.list_teams(SortKey::TeamId, SortOrder::Ascending))
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::Mutex;

    use relay_core::config::OverflowPolicy;
    use relay_core::journal::{self, JournalSink};
    use relay_core::registry::MemoryRegistry;

    use super::*;
    use crate::hub;

    const MINUTE: Duration = Duration::from_secs(60);
    const T0: Timestamp = 1_700_000_000_000;

    /// Sink that keeps flushed bytes in memory.
    #[derive(Clone, Default)]
    struct MemSink(Arc<Mutex<Vec<u8>>>);

    impl JournalSink for MemSink {
        fn write_batch(&mut self, batch: &[u8]) -> io::Result<()> {
            self.0.lock().unwrap().extend_from_slice(batch);
            Ok(())
        }
    }

    struct FailingSink;

    impl JournalSink for FailingSink {
        fn write_batch(&mut self, _batch: &[u8]) -> io::Result<()> {
            Err(io::Error::other("disk full"))
        }
    }

    fn processor(sink: MemSink) -> LapProcessor<MemoryRegistry> {
        let journal = Journal::with_sink(Box::new(sink), 1);
        LapProcessor::new(MemoryRegistry::new(), journal, MINUTE)
    }

    /// Eight teams; team 7 is "Foobar" and owns tag 101.
    fn with_foobar(sink: MemSink) -> LapProcessor<MemoryRegistry> {
        let mut p = processor(sink);
        for i in 0..7 {
            p.add_team(&format!("Team {i}"), "Lead").unwrap();
        }
        assert_eq!(p.add_team("Foobar", "Pat").unwrap(), 7);
        p.add_tag(7, 101).unwrap();
        p
    }

    #[test]
    fn flush_and_close_write_pending_records() {
        let sink = MemSink::default();
        let mut p = LapProcessor::new(
            MemoryRegistry::new(),
            Journal::with_sink(Box::new(sink.clone()), 3),
            MINUTE,
        );
        let team = p.add_team("Foobar", "Pat").unwrap();
        assert_eq!(p.journal().pending(), 1);
        p.flush_journal().unwrap();
        assert_eq!(p.journal().pending(), 0);
        assert_eq!(sink.0.lock().unwrap().as_slice(), b"T,Foobar,Pat\n");

        assert_eq!(p.add_tag_range(team, 101, 102).unwrap(), 2);
        let registry = p.close().unwrap();
        assert_eq!(registry.tags_for_team(team).len(), 2);

        let text = String::from_utf8(sink.0.lock().unwrap().clone()).unwrap();
        let mut replayed = MemoryRegistry::new();
        journal::replay_from(io::Cursor::new(text), &mut replayed).unwrap();
        assert_eq!(replayed, registry);
    }

    #[test]
    fn worked_example() {
        let mut p = with_foobar(MemSink::default());

        let first = p.handle_read(101, Some(0), T0).unwrap();
        assert_eq!(
            first,
            Notification {
                tag_id: 101,
                team_id: 7,
                team_lap_count: 1,
                team_name: "Foobar".into(),
                team_rank: "1".into(),
            }
        );

        assert_eq!(
            p.handle_read(101, Some(0), T0 + 30_000),
            Err(LapError::DuplicateRead {
                tag_id: 101,
                elapsed_ms: 30_000
            })
        );
        assert_eq!(p.registry().lookup_team(7).unwrap().lap_count, 1);

        let third = p.handle_read(101, Some(1), T0 + 61_000).unwrap();
        assert_eq!(third.team_lap_count, 2);
        assert_eq!(third.team_rank, "1");

        let tag = p.registry().lookup_tag(101).unwrap();
        assert_eq!(tag.lap_count, 2);
        assert_eq!(tag.last_update, Some(T0 + 61_000));
        let team = p.registry().lookup_team(7).unwrap();
        assert_eq!(team.hours.iter().collect::<Vec<_>>(), vec![0, 1]);
    }

    #[test]
    fn read_exactly_one_interval_later_counts() {
        let mut p = with_foobar(MemSink::default());
        p.handle_read(101, Some(0), T0).unwrap();
        let n = p.handle_read(101, Some(0), T0 + 60_000).unwrap();
        assert_eq!(n.team_lap_count, 2);
    }

    #[test]
    fn backwards_clock_is_a_duplicate() {
        let mut p = with_foobar(MemSink::default());
        p.handle_read(101, Some(0), T0).unwrap();
        assert_eq!(
            p.handle_read(101, Some(0), T0 - 5_000),
            Err(LapError::DuplicateRead {
                tag_id: 101,
                elapsed_ms: 0
            })
        );
    }

    #[test]
    fn unassigned_tag_changes_nothing() {
        let sink = MemSink::default();
        let mut p = with_foobar(sink.clone());
        let before = sink.0.lock().unwrap().len();
        let standings = p.standings();

        assert_eq!(p.handle_read(999, Some(0), T0), Err(LapError::UnassignedTag(999)));
        assert_eq!(sink.0.lock().unwrap().len(), before);
        assert!(!standings.has_changed().unwrap());
    }

    #[test]
    fn reads_before_the_start_are_ignored() {
        let mut p = with_foobar(MemSink::default());
        assert_eq!(p.handle_read(101, None, T0), Err(LapError::NotStarted));
        assert_eq!(p.registry().lookup_tag(101).unwrap().last_update, None);
        // The ignored read does not open a window.
        assert!(p.handle_read(101, Some(0), T0 + 1).is_ok());
    }

    #[test]
    fn storage_failure_applies_nothing() {
        let mut reg = MemoryRegistry::new();
        let team = reg.insert_team("Foobar", "Pat").unwrap();
        reg.insert_tag(team, 101).unwrap();
        let journal = Journal::with_sink(Box::new(FailingSink), 1);
        let mut p = LapProcessor::new(reg.clone(), journal, MINUTE);

        let err = p.handle_read(101, Some(0), T0).unwrap_err();
        assert!(matches!(err, LapError::Storage(_)));
        assert!(!err.is_fatal());
        assert_eq!(p.registry(), &reg);
        assert_eq!(p.journal().pending(), 0);
    }

    #[test]
    fn admin_operations_are_validated_before_journaling() {
        let sink = MemSink::default();
        let mut p = with_foobar(sink.clone());
        let before = sink.0.lock().unwrap().len();

        assert!(matches!(
            p.add_tag(7, 101),
            Err(AdminError::Registry(RegistryError::TagAlreadyAssigned { tag_id: 101, team_id: 7 }))
        ));
        assert!(matches!(
            p.add_tag(42, 500),
            Err(AdminError::Registry(RegistryError::TeamNotFound(42)))
        ));
        assert!(matches!(p.add_team("a,b", "x"), Err(AdminError::Journal(_))));
        assert_eq!(sink.0.lock().unwrap().len(), before);
        assert_eq!(p.registry().team_count(), 8);
    }

    #[test]
    fn tag_range_binds_inclusive() {
        let mut p = processor(MemSink::default());
        let team = p.add_team("Foobar", "Pat").unwrap();
        assert_eq!(p.add_tag_range(team, 110, 101).unwrap(), 10);
        assert_eq!(p.registry().tags_for_team(team).len(), 10);
        assert_eq!(p.registry().lookup_tag(110).unwrap().team_id, team);
    }

    #[test]
    fn reset_clears_laps_and_hours_and_publishes() {
        let mut p = with_foobar(MemSink::default());
        p.handle_read(101, Some(3), T0).unwrap();
        let mut standings = p.standings();

        p.reset_laps().unwrap();
        assert!(standings.has_changed().unwrap());
        let snap = standings.borrow_and_update().clone();
        assert_eq!(snap.total_laps, 0);
        assert!(snap.team(7).unwrap().hours.is_empty());
        // The window survives a reset.
        assert!(matches!(
            p.handle_read(101, Some(3), T0 + 1_000),
            Err(LapError::DuplicateRead { .. })
        ));
    }

    #[test]
    fn standings_follow_each_lap() {
        let mut p = with_foobar(MemSink::default());
        p.add_tag(2, 55).unwrap();
        let standings = p.standings();

        p.handle_read(101, Some(0), T0).unwrap();
        p.handle_read(55, Some(0), T0).unwrap();
        let n = p.handle_read(101, Some(0), T0 + 60_000).unwrap();
        assert_eq!(n.team_rank, "1");

        let snap = standings.borrow().clone();
        assert_eq!(snap.total_laps, 3);
        assert_eq!(snap.team(7).unwrap().lap_count, 2);
        assert_eq!(snap.team(2).unwrap().rank, "2");
        assert_eq!(snap.team(0).unwrap().rank, "3");
        assert_eq!(snap.team(1).unwrap().rank, "3 (T)");
    }

    #[test]
    fn journal_replay_reproduces_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.csv");
        let journal = Journal::open(&path, 2).unwrap();
        let mut p = LapProcessor::new(MemoryRegistry::new(), journal, MINUTE);

        let a = p.add_team("Foobar", "Pat").unwrap();
        let b = p.add_team("Quux", "Sam").unwrap();
        p.add_tag_range(a, 101, 103).unwrap();
        p.add_tag(b, 201).unwrap();
        p.handle_read(101, Some(0), T0).unwrap();
        p.handle_read(201, Some(0), T0).unwrap();
        p.handle_read(102, Some(1), T0 + 1).unwrap();
        p.handle_read(101, Some(2), T0 + 120_000).unwrap();

        let LapProcessor { registry, journal, .. } = p;
        journal.close().unwrap();

        let mut replayed = MemoryRegistry::new();
        let stats = journal::replay(&path, &mut replayed).unwrap();
        assert_eq!(stats.laps, 4);
        assert_eq!(replayed, registry);
    }

    #[tokio::test]
    async fn run_publishes_accepted_laps() {
        let p = with_foobar(MemSink::default());
        let (hub_task, hub) = hub::channel(10, OverflowPolicy::DropOldest);
        let (stop_tx, stop_rx) = watch::channel(false);
        let (hour_tx, hour_rx) = watch::channel(None);
        let (intake_tx, intake_rx) = mpsc::channel(8);

        tokio::spawn(hub_task.run(stop_rx.clone()));
        let mut sub = hub.subscribe().await.unwrap();
        let task = tokio::spawn(p.run(intake_rx, hour_rx, hub.clone(), stop_rx));

        // Before the start: ignored.
        intake_tx.send(101).await.unwrap();
        hour_tx.send_replace(Some(0));
        intake_tx.send(999).await.unwrap();
        intake_tx.send(101).await.unwrap();
        intake_tx.send(101).await.unwrap();

        let n = tokio::time::timeout(Duration::from_secs(2), sub.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n.team_id, 7);
        assert_eq!(n.team_lap_count, 1);

        drop(intake_tx);
        let exit = task.await.unwrap();
        assert!(exit.fatal.is_none());
        assert_eq!(exit.registry.lookup_team(7).unwrap().lap_count, 1);
        stop_tx.send_replace(true);
    }
}
