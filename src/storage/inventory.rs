//! Local set inventory derived from artifact file names

use super::{CHECKSUM_EXTENSION, StorageLayout, ZIP_EXTENSION};
use crate::config::OutputFormat;
use crate::error::Result;
use crate::types::SetId;
use std::collections::BTreeSet;
use std::io::ErrorKind;

/// Sets that have an archive or a sidecar in one representation folder
///
/// A missing folder is an empty inventory.
pub fn format_inventory(layout: &StorageLayout, format: &OutputFormat) -> Result<BTreeSet<SetId>> {
    let dir = layout.format_dir(format);
    let entries = match std::fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeSet::new()),
        Err(e) => return Err(e.into()),
    };

    let sidecar_suffix = format!("{ZIP_EXTENSION}{CHECKSUM_EXTENSION}");
    let mut sets = BTreeSet::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let id = name
            .strip_suffix(sidecar_suffix.as_str())
            .or_else(|| name.strip_suffix(ZIP_EXTENSION));
        if let Some(id) = id.filter(|id| !id.is_empty()) {
            sets.insert(SetId::from(id));
        }
    }
    Ok(sets)
}

/// Union of the inventories of every representation
pub fn local_inventory(layout: &StorageLayout) -> Result<BTreeSet<SetId>> {
    let mut all = BTreeSet::new();
    for format in layout.formats() {
        all.extend(format_inventory(layout, format)?);
    }
    Ok(all)
}

/// Remove a set's archive and sidecar from every representation folder
///
/// Representations that never held the set are skipped. Returns the number
/// of files removed; failures are logged.
pub fn remove_set(layout: &StorageLayout, set: &SetId) -> usize {
    let mut removed = 0;
    for format in layout.formats() {
        for path in [layout.archive_path(format, set), layout.checksum_path(format, set)] {
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    tracing::info!(set = %set, format = %format.name, file = %path.display(), "Deleted artifact");
                    removed += 1;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::error!(set = %set, file = %path.display(), error = %e, "Failed to delete artifact");
                }
            }
        }
    }
    removed
}
