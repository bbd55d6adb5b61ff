//! Failure ledger: sets not confirmed harvested by the most recent run
//!
//! Stored as `<root>/FailedSetsReport_<dd-MM-yyyy>.csv` with a `Failed Sets`
//! header line and one set id per line. Only the orchestrating task touches
//! it: read once at run start, overwritten once at run end.

use crate::error::Result;
use crate::types::SetId;
use chrono::NaiveDate;
use std::path::PathBuf;

/// File name prefix of ledger files
pub const LEDGER_PREFIX: &str = "FailedSetsReport_";

/// Header line of a ledger file
pub const LEDGER_HEADER: &str = "Failed Sets";

const LEDGER_EXTENSION: &str = ".csv";
const LEDGER_DATE_FORMAT: &str = "%d-%m-%Y";

/// Durable record of outstanding failed sets
#[derive(Clone, Debug)]
pub struct FailureLedger {
    root: PathBuf,
}

impl FailureLedger {
    /// Ledger kept in the output root `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Ledger path for a run on `date`
    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.root.join(format!(
            "{LEDGER_PREFIX}{}{LEDGER_EXTENSION}",
            date.format(LEDGER_DATE_FORMAT)
        ))
    }

    /// Most recent ledger file, by the date in its name
    pub fn latest(&self) -> Result<Option<PathBuf>> {
        Ok(self
            .ledger_files()?
            .into_iter()
            .max_by_key(|(date, _)| *date)
            .map(|(_, path)| path))
    }

    /// Sets recorded by the most recent ledger
    ///
    /// No ledger file (or an empty one) is an empty list, not an error.
    pub fn read(&self) -> Result<Vec<SetId>> {
        let Some(path) = self.latest()? else {
            tracing::debug!(root = %self.root.display(), "No failed sets ledger found");
            return Ok(Vec::new());
        };
        let content = std::fs::read_to_string(&path)?;
        let sets: Vec<SetId> = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && *line != LEDGER_HEADER)
            .map(SetId::from)
            .collect();
        tracing::info!(ledger = %path.display(), failed_sets = sets.len(), "Read failed sets ledger");
        Ok(sets)
    }

    /// Overwrite the ledger with exactly `sets`
    ///
    /// The file for `date` is written and older ledger files are removed, so
    /// [`FailureLedger::read`] always sees this content.
    pub fn write(&self, sets: &[SetId], date: NaiveDate) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.root)?;
        let path = self.path_for(date);
        let mut content = String::with_capacity(LEDGER_HEADER.len() + 1 + sets.len() * 16);
        content.push_str(LEDGER_HEADER);
        content.push('\n');
        for set in sets {
            content.push_str(set.as_str());
            content.push('\n');
        }
        std::fs::write(&path, content)?;

        for (_, stale) in self.ledger_files()? {
            if stale != path {
                if let Err(e) = std::fs::remove_file(&stale) {
                    tracing::warn!(ledger = %stale.display(), error = %e, "Failed to remove stale ledger");
                }
            }
        }

        tracing::info!(ledger = %path.display(), failed_sets = sets.len(), "Wrote failed sets ledger");
        Ok(path)
    }

    fn ledger_files(&self) -> Result<Vec<(NaiveDate, PathBuf)>> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut files = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(date) = ledger_date(&name) {
                files.push((date, entry.path()));
            }
        }
        Ok(files)
    }
}

fn ledger_date(name: &str) -> Option<NaiveDate> {
    let raw = name
        .strip_prefix(LEDGER_PREFIX)?
        .strip_suffix(LEDGER_EXTENSION)?;
    NaiveDate::parse_from_str(raw, LEDGER_DATE_FORMAT).ok()
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn never_created_ledger_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = FailureLedger::new(dir.path().join("missing"));
        assert!(ledger.read().unwrap().is_empty());
    }

    #[test]
    fn file_layout_has_header_and_one_set_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = FailureLedger::new(dir.path());
        let path = ledger
            .write(&["A".into(), "B".into()], date(2024, 3, 7))
            .unwrap();

        assert_eq!(path, dir.path().join("FailedSetsReport_07-03-2024.csv"));
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "Failed Sets\nA\nB\n"
        );
    }

    #[test]
    fn write_of_read_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = FailureLedger::new(dir.path());
        let path = ledger
            .write(&["C".into(), "A".into()], date(2024, 3, 7))
            .unwrap();
        let before = std::fs::read_to_string(&path).unwrap();

        let sets = ledger.read().unwrap();
        ledger.write(&sets, date(2024, 3, 7)).unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), before);
        assert_eq!(ledger.read().unwrap(), sets);
    }

    #[test]
    fn read_picks_most_recent_date_not_name_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("FailedSetsReport_31-01-2024.csv"),
            "Failed Sets\nOLD\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("FailedSetsReport_01-02-2024.csv"),
            "Failed Sets\nNEW\n",
        )
        .unwrap();

        let ledger = FailureLedger::new(dir.path());
        assert_eq!(ledger.read().unwrap(), vec![SetId::from("NEW")]);
    }

    #[test]
    fn write_replaces_older_ledgers() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = FailureLedger::new(dir.path());
        ledger.write(&["A".into()], date(2024, 1, 1)).unwrap();
        ledger.write(&[], date(2024, 1, 2)).unwrap();

        assert!(!dir.path().join("FailedSetsReport_01-01-2024.csv").exists());
        assert!(ledger.read().unwrap().is_empty());
    }

    #[test]
    fn unrelated_files_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("FailedSetsReport_latest.csv"), "X\n").unwrap();
        std::fs::write(dir.path().join("lastHarvestDate.txt"), "x").unwrap();
        let ledger = FailureLedger::new(dir.path());
        assert!(ledger.read().unwrap().is_empty());
    }
}
