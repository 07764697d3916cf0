//! Write-ahead journal of registry mutations.
//!
//! Every accepted mutation is appended to the journal before it is applied
//! to the registry. Records are buffered in memory and written out once the
//! buffer holds `flush_threshold` records, or on an explicit [`Journal::flush`]
//! (always issued by [`Journal::close`] at shutdown). A crash can therefore
//! lose at most `flush_threshold - 1` of the most recent mutations.
//!
//! On startup the whole file is replayed, in order, into a fresh registry.
//! Replay writes straight to the registry and never appends to the journal.
//!
//! # Format
//!
//! One record per line, UTF-8, comma-separated, op code first:
//!
//! ```text
//! T,<name>,<leader>            add team (ids follow insertion order)
//! G,<team_id>,<tag_id>         add tag
//! L,<tag_id>,<hour|->,<ms>     increment lap
//! Z                            zero all laps
//! ```
//!
//! Names holding a comma or a double quote are written as quoted fields
//! (see [`fields`](crate::fields)); names with a line break are refused.
//! Lowercase op codes and the short `L,<tag_id>` form written by older
//! versions are accepted on replay. A short lap record recovers the lap but
//! not the hour flag or the read time.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::fields;
use crate::registry::Registry;
use crate::types::*;

const OP_ADD_TEAM: char = 'T';
const OP_ADD_TAG: char = 'G';
const OP_INCREMENT_LAP: char = 'L';
const OP_ZERO_LAPS: char = 'Z';

/// Placeholder for a lap record without an hour.
const NO_HOUR: &str = "-";

/// Journal failures.
#[derive(Debug, Error)]
pub enum JournalError {
    /// Opening, writing or syncing the journal file failed.
    #[error("journal io error: {0}")]
    Io(#[from] io::Error),

    /// A record could not be parsed or applied during replay.
    #[error("malformed journal record at line {line}: {reason}")]
    Malformed { line: usize, reason: String },

    /// A text field contains a line break.
    #[error("cannot journal {field} {value:?}: contains a line break")]
    Unencodable { field: &'static str, value: String },
}

/// One journaled mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalRecord {
    AddTeam { name: String, leader: String },
    AddTag { team_id: TeamId, tag_id: TagId },
    IncrementLap { tag_id: TagId, hour: Option<u8>, at: Option<Timestamp> },
    ZeroAllLaps,
}

impl JournalRecord {
    /// Check that the record survives a round trip through the text format.
    pub fn validate(&self) -> Result<(), JournalError> {
        if let JournalRecord::AddTeam { name, leader } = self {
            check_field("team name", name)?;
            check_field("team leader", leader)?;
        }
        Ok(())
    }

    /// Parse one line (without its line break).
    pub fn parse(line: &str) -> Result<Self, String> {
        let parts = fields::split(line)?;
        let op = parts.first().map(|f| f.trim()).unwrap_or_default();
        let mut chars = op.chars();
        let code = match (chars.next(), chars.next()) {
            (Some(c), None) => c.to_ascii_uppercase(),
            _ => return Err(format!("bad op code {op:?}")),
        };
        let args = &parts[1..];

        match code {
            OP_ADD_TEAM => match args {
                [name, leader] => Ok(JournalRecord::AddTeam {
                    name: name.clone(),
                    leader: leader.clone(),
                }),
                _ => Err(arity(code, "2", args.len())),
            },
            OP_ADD_TAG => match args {
                [team_id, tag_id] => Ok(JournalRecord::AddTag {
                    team_id: parse_num("team id", team_id)?,
                    tag_id: parse_num("tag id", tag_id)?,
                }),
                _ => Err(arity(code, "2", args.len())),
            },
            OP_INCREMENT_LAP => {
                let (tag_id, hour, at) = match args {
                    [tag_id] => (tag_id, None, None),
                    [tag_id, hour] => (tag_id, Some(hour), None),
                    [tag_id, hour, at] => (tag_id, Some(hour), Some(at)),
                    _ => return Err(arity(code, "1 to 3", args.len())),
                };
                let hour = match hour.map(|h| h.trim()) {
                    None | Some(NO_HOUR) => None,
                    Some(h) => {
                        let h: u8 = parse_num("hour", h)?;
                        if h as usize >= HOURS_PER_EVENT {
                            return Err(format!("hour {h} outside the event"));
                        }
                        Some(h)
                    }
                };
                Ok(JournalRecord::IncrementLap {
                    tag_id: parse_num("tag id", tag_id)?,
                    hour,
                    at: at.map(|a| parse_num("timestamp", a)).transpose()?,
                })
            }
            OP_ZERO_LAPS => match args {
                [] => Ok(JournalRecord::ZeroAllLaps),
                _ => Err(arity(code, "0", args.len())),
            },
            other => Err(format!("unknown op code {other:?}")),
        }
    }

    /// Apply the record to a registry, as replay does.
    pub fn apply<R: Registry + ?Sized>(&self, registry: &mut R) -> Result<(), String> {
        match self {
            JournalRecord::AddTeam { name, leader } => {
                registry.insert_team(name, leader).map_err(|e| e.to_string())?;
            }
            JournalRecord::AddTag { team_id, tag_id } => {
                registry.insert_tag(*team_id, *tag_id).map_err(|e| e.to_string())?;
            }
            JournalRecord::IncrementLap { tag_id, hour, at } => {
                let tag = registry.lookup_tag(*tag_id).map_err(|e| e.to_string())?;
                let inc = LapIncrement {
                    tag_id: *tag_id,
                    team_id: tag.team_id,
                    hour: *hour,
                    at: *at,
                };
                registry.apply_lap_increment(&inc).map_err(|e| e.to_string())?;
            }
            JournalRecord::ZeroAllLaps => {
                registry.reset_all_lap_counts().map_err(|e| e.to_string())?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for JournalRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JournalRecord::AddTeam { name, leader } => {
                write!(f, "{OP_ADD_TEAM},{},{}", fields::quote(name), fields::quote(leader))
            }
            JournalRecord::AddTag { team_id, tag_id } => write!(f, "{OP_ADD_TAG},{team_id},{tag_id}"),
            JournalRecord::IncrementLap { tag_id, hour, at } => {
                write!(f, "{OP_INCREMENT_LAP},{tag_id}")?;
                match hour {
                    Some(h) => write!(f, ",{h}")?,
                    None => write!(f, ",{NO_HOUR}")?,
                }
                if let Some(at) = at {
                    write!(f, ",{at}")?;
                }
                Ok(())
            }
            JournalRecord::ZeroAllLaps => write!(f, "{OP_ZERO_LAPS}"),
        }
    }
}

fn check_field(field: &'static str, value: &str) -> Result<(), JournalError> {
    if !fields::is_encodable(value) {
        return Err(JournalError::Unencodable {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

fn parse_num<T: std::str::FromStr>(what: &str, raw: &str) -> Result<T, String> {
    raw.trim().parse().map_err(|_| format!("bad {what} {raw:?}"))
}

fn arity(code: char, expected: &str, got: usize) -> String {
    format!("op {code} takes {expected} field(s), got {got}")
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

/// Stable storage the journal flushes into.
pub trait JournalSink: Send {
    /// Durably append `bytes`. On error nothing from `bytes` may remain.
    fn write_batch(&mut self, bytes: &[u8]) -> io::Result<()>;
}

/// Append-only journal file, synced on every batch.
pub struct FileSink {
    file: File,
}

impl FileSink {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file })
    }
}

impl JournalSink for FileSink {
    fn write_batch(&mut self, bytes: &[u8]) -> io::Result<()> {
        let len_before = self.file.metadata()?.len();
        let result = self.file.write_all(bytes).and_then(|_| self.file.sync_data());
        if let Err(e) = result {
            // Drop any partial line so replay never sees half a record.
            if let Err(trunc) = self.file.set_len(len_before) {
                warn!("[journal] could not truncate after failed write: {trunc}");
            }
            return Err(e);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Journal
// ---------------------------------------------------------------------------

/// Buffered write-ahead journal.
///
/// Dropping a journal without [`close`](Journal::close) discards the buffer,
/// exactly as a crash would.
pub struct Journal {
    sink: Box<dyn JournalSink>,
    pending: Vec<String>,
    flush_threshold: usize,
    written: u64,
}

impl Journal {
    /// Open (or create) the journal file at `path` for appending.
    pub fn open(path: &Path, flush_threshold: usize) -> Result<Self, JournalError> {
        let sink = FileSink::open(path)?;
        info!("[journal] appending to {} (flush every {flush_threshold} record(s))", path.display());
        Ok(Self::with_sink(Box::new(sink), flush_threshold))
    }

    /// Journal over an arbitrary sink. A threshold of 0 is treated as 1.
    pub fn with_sink(sink: Box<dyn JournalSink>, flush_threshold: usize) -> Self {
        let flush_threshold = flush_threshold.max(1);
        Self {
            sink,
            pending: Vec::with_capacity(flush_threshold),
            flush_threshold,
            written: 0,
        }
    }

    /// Buffer a record, flushing once the threshold is reached.
    ///
    /// If the flush fails the record is taken back out of the buffer and the
    /// error returned, so the caller can treat the mutation as never
    /// accepted. Records buffered by earlier appends stay pending.
    pub fn append(&mut self, record: &JournalRecord) -> Result<(), JournalError> {
        record.validate()?;
        let mut line = record.to_string();
        line.push('\n');
        self.pending.push(line);

        if self.pending.len() >= self.flush_threshold {
            if let Err(e) = self.flush() {
                self.pending.pop();
                return Err(e);
            }
        }
        Ok(())
    }

    /// Write every buffered record to stable storage.
    pub fn flush(&mut self) -> Result<(), JournalError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let batch: String = self.pending.concat();
        self.sink.write_batch(batch.as_bytes())?;
        self.written += self.pending.len() as u64;
        debug!("[journal] flushed {} record(s)", self.pending.len());
        self.pending.clear();
        Ok(())
    }

    /// Final flush at shutdown.
    pub fn close(mut self) -> Result<(), JournalError> {
        self.flush()?;
        info!("[journal] closed after writing {} record(s)", self.written);
        Ok(())
    }

    /// Records accepted but not yet on stable storage.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

// ---------------------------------------------------------------------------
// Replay
// ---------------------------------------------------------------------------

/// Counts of replayed records, by kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub teams: usize,
    pub tags: usize,
    pub laps: usize,
    pub resets: usize,
}

impl ReplayStats {
    pub fn records(&self) -> usize {
        self.teams + self.tags + self.laps + self.resets
    }
}

/// Replay the journal at `path` into `registry`.
///
/// A missing file is an empty journal. Any malformed record aborts the
/// replay; the registry is then only partially rebuilt and must not be used.
pub fn replay<R: Registry + ?Sized>(path: &Path, registry: &mut R) -> Result<ReplayStats, JournalError> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            info!("[journal] no journal at {}, starting empty", path.display());
            return Ok(ReplayStats::default());
        }
        Err(e) => return Err(e.into()),
    };
    let stats = replay_from(BufReader::new(file), registry)?;
    info!(
        "[journal] replayed {} record(s) from {}: {} team(s), {} tag(s), {} lap(s), {} reset(s)",
        stats.records(),
        path.display(),
        stats.teams,
        stats.tags,
        stats.laps,
        stats.resets,
    );
    Ok(stats)
}

/// Replay journal lines from any reader.
pub fn replay_from<B: BufRead, R: Registry + ?Sized>(
    reader: B,
    registry: &mut R,
) -> Result<ReplayStats, JournalError> {
    let mut stats = ReplayStats::default();
    for (idx, line) in reader.lines().enumerate() {
        let line_no = idx + 1;
        let line = line.map_err(|e| JournalError::Malformed {
            line: line_no,
            reason: e.to_string(),
        })?;
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        let malformed = |reason: String| JournalError::Malformed { line: line_no, reason };
        let record = JournalRecord::parse(line).map_err(malformed)?;
        record.apply(registry).map_err(malformed)?;
        match record {
            JournalRecord::AddTeam { .. } => stats.teams += 1,
            JournalRecord::AddTag { .. } => stats.tags += 1,
            JournalRecord::IncrementLap { .. } => stats.laps += 1,
            JournalRecord::ZeroAllLaps => stats.resets += 1,
        }
    }
    Ok(stats)
}
