//! Roster import from the registration spreadsheet export.
//!
//! The file is CSV with a header row. Column 0 is the team name, column 1
//! the team leader, and column 5 (optional) the tags handed out to the team:
//! either a range `first-last` or a single id. Other columns are ignored.
//! Double-quoted fields may contain commas and `""` escapes, but not line
//! breaks.

use std::path::Path;

use relay_core::error::RelayError;
use relay_core::fields;
use relay_core::journal::JournalError;
use relay_core::registry::{Registry, RegistryError};
use relay_core::types::{TagId, TeamId};
use tracing::info;

use crate::processor::{AdminError, LapProcessor};

const COL_NAME: usize = 0;
const COL_LEADER: usize = 1;
const COL_TAGS: usize = 5;

/// One team row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    pub name: String,
    pub leader: String,
    /// Inclusive tag range, if the team was given tags up front.
    pub tags: Option<(TagId, TagId)>,
}

/// Totals of an applied import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub teams: usize,
    pub tags: usize,
}

/// Parse roster CSV text. Line numbers in errors are 1-based.
pub fn parse_roster(text: &str) -> Result<Vec<RosterEntry>, RelayError> {
    let mut entries = Vec::new();
    // Skip the header row.
    for (idx, raw) in text.lines().enumerate().skip(1) {
        let line = idx + 1;
        if raw.trim().is_empty() {
            continue;
        }
        let fields = fields::split(raw).map_err(|reason| RelayError::Import { line, reason })?;
        let field = |i: usize| fields.get(i).map(|f| f.trim()).unwrap_or("");

        let name = field(COL_NAME);
        if name.is_empty() {
            return Err(RelayError::Import {
                line,
                reason: "missing team name".into(),
            });
        }
        let tags = parse_tag_range(field(COL_TAGS)).map_err(|reason| RelayError::Import { line, reason })?;
        entries.push(RosterEntry {
            name: name.to_string(),
            leader: field(COL_LEADER).to_string(),
            tags,
        });
    }
    Ok(entries)
}

/// Read and parse a roster file.
pub fn load_roster(path: &Path) -> anyhow::Result<Vec<RosterEntry>> {
    let text = std::fs::read_to_string(path)?;
    Ok(parse_roster(&text)?)
}

/// Create the teams and bind their tags, in file order, through the
/// processor so every step is journaled.
///
/// The whole roster is checked first. A roster with a name that cannot be
/// journaled, overlapping tag ranges, or a tag that is already bound is
/// refused before anything is written.
pub fn import_roster<R: Registry>(
    processor: &mut LapProcessor<R>,
    entries: &[RosterEntry],
) -> Result<ImportSummary, AdminError> {
    check_roster(processor.registry(), entries)?;

    let mut summary = ImportSummary::default();
    for entry in entries {
        let team_id = processor.add_team(&entry.name, &entry.leader)?;
        summary.teams += 1;
        if let Some((first, last)) = entry.tags {
            summary.tags += processor.add_tag_range(team_id, first, last)?;
        }
    }
    info!("[roster] imported {} team(s) and {} tag(s)", summary.teams, summary.tags);
    Ok(summary)
}

fn check_roster<R: Registry>(registry: &R, entries: &[RosterEntry]) -> Result<(), AdminError> {
    let first_id = registry.team_count() as TeamId;
    let mut claimed: Vec<(TagId, TagId, TeamId)> = Vec::new();

    for (team_id, entry) in (first_id..).zip(entries) {
        for (field, value) in [("team name", &entry.name), ("team leader", &entry.leader)] {
            if !fields::is_encodable(value) {
                return Err(JournalError::Unencodable {
                    field,
                    value: value.clone(),
                }
                .into());
            }
        }
        if let Some((first, last)) = entry.tags {
            let (lo, hi) = (first.min(last), first.max(last));
            for tag_id in lo..=hi {
                if let Ok(tag) = registry.lookup_tag(tag_id) {
                    return Err(RegistryError::TagAlreadyAssigned {
                        tag_id,
                        team_id: tag.team_id,
                    }
                    .into());
                }
            }
            claimed.push((lo, hi, team_id));
        }
    }

    claimed.sort_unstable();
    let mut reach: Option<(TagId, TeamId)> = None;
    for (lo, hi, team_id) in claimed {
        if let Some((last, owner)) = reach {
            if lo <= last {
                return Err(RegistryError::TagAlreadyAssigned { tag_id: lo, team_id: owner }.into());
            }
        }
        match reach {
            Some((last, _)) if hi <= last => {}
            _ => reach = Some((hi, team_id)),
        }
    }
    Ok(())
}

/// `""` gives no tags, `"7"` one tag, `"101-110"` a range.
fn parse_tag_range(field: &str) -> Result<Option<(TagId, TagId)>, String> {
    if field.is_empty() {
        return Ok(None);
    }
    let parse = |s: &str| {
        s.trim()
            .parse::<TagId>()
            .map_err(|_| format!("bad tag id {s:?} in {field:?}"))
    };
    match field.split_once('-') {
        Some((first, last)) => {
            let (first, last) = (parse(first)?, parse(last)?);
            if first > last {
                return Err(format!("tag range {field:?} runs backwards"));
            }
            Ok(Some((first, last)))
        }
        None => {
            let tag = parse(field)?;
            Ok(Some((tag, tag)))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use relay_core::journal::{self, Journal};
    use relay_core::registry::MemoryRegistry;

    use super::*;

    const HEADER: &str = "Team,Leader,Email,Phone,Size,Tags\n";

    #[test]
    fn parses_rows() {
        let text = format!(
            "{HEADER}Foobar,Pat,pat@example.org,555,4,101-104\n\
             \"Smith, Jones & Co\",\"Sam \"\"Red\"\" Smith\",,,,7\n\
             \n\
             Latecomers,Alex\n"
        );
        let entries = parse_roster(&text).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(
            entries[0],
            RosterEntry {
                name: "Foobar".into(),
                leader: "Pat".into(),
                tags: Some((101, 104)),
            }
        );
        assert_eq!(entries[1].name, "Smith, Jones & Co");
        assert_eq!(entries[1].leader, "Sam \"Red\" Smith");
        assert_eq!(entries[1].tags, Some((7, 7)));
        assert_eq!(entries[2].tags, None);
    }

    #[test]
    fn header_only_is_empty() {
        assert!(parse_roster(HEADER).unwrap().is_empty());
        assert!(parse_roster("").unwrap().is_empty());
    }

    #[test]
    fn bad_rows_report_their_line() {
        let err = parse_roster(&format!("{HEADER}a,b,,,,1-x\n")).unwrap_err();
        assert!(matches!(err, RelayError::Import { line: 2, .. }));

        let err = parse_roster(&format!("{HEADER}a,b\nc,d,,,,9-3\n")).unwrap_err();
        assert!(matches!(err, RelayError::Import { line: 3, .. }));

        let err = parse_roster(&format!("{HEADER}\"open,b\n")).unwrap_err();
        assert!(matches!(err, RelayError::Import { line: 2, .. }));

        let err = parse_roster(&format!("{HEADER},b\n")).unwrap_err();
        assert!(matches!(err, RelayError::Import { line: 2, .. }));
    }

    #[test]
    fn import_assigns_ids_in_file_order() {
        let text = format!("{HEADER}Foobar,Pat,,,,101-103\nQuux,Sam,,,,\nBaz,Kim,,,,200\n");
        let entries = parse_roster(&text).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::open(&dir.path().join("journal.csv"), 2).unwrap();
        let mut p = LapProcessor::new(MemoryRegistry::new(), journal, Duration::from_secs(60));

        let summary = import_roster(&mut p, &entries).unwrap();
        assert_eq!(summary, ImportSummary { teams: 3, tags: 4 });
        assert_eq!(p.registry().lookup_team(1).unwrap().name, "Quux");
        assert_eq!(p.registry().lookup_tag(102).unwrap().team_id, 0);
        assert_eq!(p.registry().lookup_tag(200).unwrap().team_id, 2);
    }

    fn processor_at(path: &std::path::Path) -> LapProcessor<MemoryRegistry> {
        LapProcessor::new(MemoryRegistry::new(), Journal::open(path, 2).unwrap(), Duration::from_secs(60))
    }

    #[test]
    fn quoted_names_import_and_replay() {
        let text = format!("{HEADER}\"Smith, Jones & Co\",\"Sam \"\"Red\"\"\",,,,1-2\nFoobar,Pat,,,,3\n");
        let entries = parse_roster(&text).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.csv");
        let mut p = processor_at(&path);
        assert_eq!(import_roster(&mut p, &entries).unwrap(), ImportSummary { teams: 2, tags: 3 });
        let live = p.close().unwrap();

        let mut replayed = MemoryRegistry::new();
        journal::replay(&path, &mut replayed).unwrap();
        assert_eq!(replayed, live);
        assert_eq!(replayed.lookup_team(0).unwrap().name, "Smith, Jones & Co");
        assert_eq!(replayed.lookup_team(0).unwrap().leader, "Sam \"Red\"");
    }

    #[test]
    fn rejected_roster_writes_nothing() {
        let entry = |name: &str, tags| RosterEntry {
            name: name.into(),
            leader: "Pat".into(),
            tags,
        };
        let rosters = [
            vec![entry("Foobar", Some((101, 110))), entry("Quux", Some((110, 120)))],
            vec![entry("Foobar", Some((1, 100))), entry("Quux", Some((5, 5)))],
            vec![entry("Foobar", Some((101, 110))), entry("Line\rbreak", None)],
        ];

        for entries in rosters {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("journal.csv");
            let mut p = processor_at(&path);
            assert!(import_roster(&mut p, &entries).is_err(), "{entries:?}");
            assert_eq!(p.registry().team_count(), 0);
            p.close().unwrap();
            assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
        }
    }

    #[test]
    fn overlap_names_the_earlier_team() {
        let dir = tempfile::tempdir().unwrap();
        let mut p = processor_at(&dir.path().join("journal.csv"));
        let team = p.add_team("Early", "Kim").unwrap();
        p.add_tag(team, 50).unwrap();

        let entries = vec![
            RosterEntry {
                name: "Foobar".into(),
                leader: "Pat".into(),
                tags: Some((10, 20)),
            },
            RosterEntry {
                name: "Quux".into(),
                leader: "Sam".into(),
                tags: Some((20, 30)),
            },
        ];
        let err = import_roster(&mut p, &entries).unwrap_err();
        assert!(matches!(
            err,
            AdminError::Registry(RegistryError::TagAlreadyAssigned { tag_id: 20, team_id: 1 })
        ));

        let entries = vec![RosterEntry {
            name: "Late".into(),
            leader: "Alex".into(),
            tags: Some((45, 55)),
        }];
        let err = import_roster(&mut p, &entries).unwrap_err();
        assert!(matches!(
            err,
            AdminError::Registry(RegistryError::TagAlreadyAssigned { tag_id: 50, team_id: 0 })
        ));
        assert_eq!(p.registry().team_count(), 1);
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roster.csv");
        std::fs::write(&path, format!("{HEADER}Foobar,Pat,,,,101\n")).unwrap();
        assert_eq!(load_roster(&path).unwrap().len(), 1);
        assert!(load_roster(&dir.path().join("missing.csv")).is_err());
    }
}
