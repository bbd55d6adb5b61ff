//! Record to archive-entry conversion, one renderer per output format

use crate::error::{Error, Result};
use crate::protocol::Record;
use std::collections::HashMap;
use std::sync::Arc;

/// Turns a harvested record into the bytes of one archive entry
pub trait RecordRenderer: Send + Sync {
    /// Render `record`; an error skips the record for every format
    fn render(&self, record: &Record) -> Result<Vec<u8>>;
}

/// Writes the metadata document as received
#[derive(Clone, Copy, Debug, Default)]
pub struct MetadataRenderer;

impl RecordRenderer for MetadataRenderer {
    fn render(&self, record: &Record) -> Result<Vec<u8>> {
        match &record.metadata {
            Some(metadata) => Ok(metadata.as_bytes().to_vec()),
            None => Err(Error::Parse(format!(
                "record {} carries no metadata",
                record.header.identifier
            ))),
        }
    }
}

/// Renderers keyed by format name
///
/// Formats without a registered renderer use [`MetadataRenderer`].
#[derive(Clone, Default)]
pub struct Renderers {
    by_format: HashMap<String, Arc<dyn RecordRenderer>>,
}

impl Renderers {
    /// Register `renderer` for the format called `format`
    pub fn with(mut self, format: impl Into<String>, renderer: Arc<dyn RecordRenderer>) -> Self {
        self.by_format.insert(format.into(), renderer);
        self
    }

    /// Renderer used for `format`
    pub fn for_format(&self, format: &str) -> Arc<dyn RecordRenderer> {
        self.by_format
            .get(format)
            .cloned()
            .unwrap_or_else(|| Arc::new(MetadataRenderer))
    }
}

impl std::fmt::Debug for Renderers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderers")
            .field("formats", &self.by_format.keys().collect::<Vec<_>>())
            .finish()
    }
}
