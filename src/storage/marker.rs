//! Last-harvest marker
//!
//! A single UTC timestamp in `<root>/lastHarvestDate.txt`. It is the lower
//! bound of the next incremental listing and the reference point of status
//! classification.

use crate::error::Result;
use crate::utils::{format_harvest_date, parse_harvest_date};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

/// File name of the marker under the output root
pub const MARKER_FILE: &str = "lastHarvestDate.txt";

/// Marker location under `root`
pub fn marker_path(root: &Path) -> PathBuf {
    root.join(MARKER_FILE)
}

/// Timestamp of the last completed unconstrained harvest
///
/// A missing or unreadable marker means "never harvested".
pub fn read_marker(root: &Path) -> Option<DateTime<Utc>> {
    let path = marker_path(root);
    let raw = match std::fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!(marker = %path.display(), "No last harvest date, treating as first run");
            return None;
        }
        Err(e) => {
            tracing::warn!(marker = %path.display(), error = %e, "Failed to read last harvest date");
            return None;
        }
    };
    let parsed = parse_harvest_date(&raw);
    if parsed.is_none() {
        tracing::warn!(marker = %path.display(), content = raw.trim(), "Unparsable last harvest date ignored");
    }
    parsed
}

/// Record `when` as the last harvest
pub fn write_marker(root: &Path, when: DateTime<Utc>) -> Result<()> {
    std::fs::create_dir_all(root)?;
    let path = marker_path(root);
    std::fs::write(&path, format_harvest_date(when))?;
    tracing::info!(marker = %path.display(), date = %format_harvest_date(when), "Updated last harvest date");
    Ok(())
}
