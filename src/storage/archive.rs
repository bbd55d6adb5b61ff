//! Per-set zip archives

use crate::error::Result;
use crate::utils::trailing_segment;
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use zip::ZipWriter;
use zip::write::FileOptions;

/// Archive entry name for a record: trailing identifier segment plus extension
pub fn entry_name(identifier: &str, extension: &str) -> String {
    format!("{}{}", trailing_segment(identifier), extension)
}

/// Writes one archive, one entry per record
///
/// The file is opened in place and truncated, so an overwritten archive keeps
/// its filesystem identity (and creation time where the platform records one).
pub struct ArchiveWriter {
    path: PathBuf,
    zip: ZipWriter<File>,
    options: FileOptions,
    names: HashSet<String>,
}

impl ArchiveWriter {
    /// Open `path` for writing, replacing any previous content
    pub fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            zip: ZipWriter::new(file),
            options: FileOptions::default().compression_method(zip::CompressionMethod::Deflated),
            names: HashSet::new(),
        })
    }

    /// Archive location
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of entries written so far
    pub fn entries(&self) -> u64 {
        self.names.len() as u64
    }

    /// Add one entry; a name already used gets a numeric suffix
    ///
    /// Returns the name actually used.
    pub fn add_entry(&mut self, name: &str, content: &[u8]) -> Result<String> {
        let name = self.unique_name(name);
        self.zip.start_file(name.as_str(), self.options)?;
        self.zip.write_all(content)?;
        self.names.insert(name.clone());
        Ok(name)
    }

    /// Write the central directory and flush to disk
    ///
    /// Returns the number of entries.
    pub fn finish(mut self) -> Result<u64> {
        let entries = self.entries();
        let file = self.zip.finish()?;
        file.sync_all()?;
        tracing::debug!(path = %self.path.display(), entries, "Archive finalized");
        Ok(entries)
    }

    fn unique_name(&self, name: &str) -> String {
        if !self.names.contains(name) {
            return name.to_string();
        }
        let (stem, ext) = match name.rfind('.') {
            Some(i) if i > 0 => name.split_at(i),
            _ => (name, ""),
        };
        (1..)
            .map(|n| format!("{stem}_{n}{ext}"))
            .find(|candidate| !self.names.contains(candidate))
            .unwrap_or_else(|| name.to_string())
    }
}

/// Number of entries in an existing archive
pub fn count_entries(path: &Path) -> Result<usize> {
    let archive = zip::ZipArchive::new(File::open(path)?)?;
    Ok(archive.len())
}
