//! On-disk layout of a harvest output root
//!
//! ```text
//! <root>/<FORMAT>/<setId>.zip
//! <root>/<FORMAT>/<setId>.zip.md5sum
//! <root>/lastHarvestDate.txt
//! <root>/FailedSetsReport_<dd-MM-yyyy>.csv
//! ```

pub mod archive;
pub mod checksum;
pub mod inventory;
pub mod ledger;
pub mod marker;

use crate::config::OutputFormat;
use crate::error::Result;
use crate::types::SetId;
use std::path::{Path, PathBuf};

/// Extension of per-set archives
pub const ZIP_EXTENSION: &str = ".zip";

/// Extension appended to an archive path for its digest sidecar
pub const CHECKSUM_EXTENSION: &str = ".md5sum";

/// Paths of everything a harvest writes under one output root
#[derive(Clone, Debug)]
pub struct StorageLayout {
    root: PathBuf,
    formats: Vec<OutputFormat>,
}

impl StorageLayout {
    /// Layout for `root` with one folder per format
    pub fn new(root: impl Into<PathBuf>, formats: Vec<OutputFormat>) -> Self {
        Self {
            root: root.into(),
            formats,
        }
    }

    /// Output root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Configured output representations
    pub fn formats(&self) -> &[OutputFormat] {
        &self.formats
    }

    /// The first configured format, used for status classification
    pub fn primary_format(&self) -> Option<&OutputFormat> {
        self.formats.first()
    }

    /// Folder of one representation
    pub fn format_dir(&self, format: &OutputFormat) -> PathBuf {
        self.root.join(&format.name)
    }

    /// Archive of one set in one representation
    pub fn archive_path(&self, format: &OutputFormat, set: &SetId) -> PathBuf {
        self.format_dir(format)
            .join(format!("{}{}", set.as_str(), ZIP_EXTENSION))
    }

    /// Digest sidecar of one set in one representation
    pub fn checksum_path(&self, format: &OutputFormat, set: &SetId) -> PathBuf {
        checksum::checksum_path(&self.archive_path(format, set))
    }

    /// Create the root and every format folder
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root)?;
        for format in &self.formats {
            std::fs::create_dir_all(self.format_dir(format))?;
        }
        Ok(())
    }
}
