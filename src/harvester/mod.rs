//! Per-set harvesting
//!
//! [`SetHarvester`] runs the paginated fetch loop for one set and streams every
//! record into one archive per output format. [`RetryingHarvester`] wraps it
//! with the fixed-delay retry policy and turns the result into a [`SetResult`]
//! the scheduler can aggregate.
//!
//! - [`render`] — record to archive-entry conversion

pub mod render;

use crate::config::{OutputFormat, RetryConfig};
use crate::error::{Error, Result};
use crate::progress::ProgressLogger;
use crate::protocol::{ListRequest, OaiClient, Record};
use crate::retry::{IsRetryable, with_retry};
use crate::storage::StorageLayout;
use crate::storage::archive::{ArchiveWriter, entry_name};
use crate::storage::checksum::write_checksum;
use crate::types::SetId;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub use render::{MetadataRenderer, RecordRenderer, Renderers};

/// Record accounting of one set harvest
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HarvestTally {
    /// Records the repository announced (or delivered, without a size hint)
    pub expected: u64,
    /// Records written to every output format
    pub written: u64,
}

impl HarvestTally {
    /// Announced records that never made it into the archives
    pub fn failed_records(&self) -> u64 {
        self.expected.saturating_sub(self.written)
    }
}

/// A set harvest that did not complete
#[derive(Debug)]
pub struct HarvestFailure {
    /// Cause
    pub error: Error,
    /// Accounting up to the failure, when at least one page arrived
    pub tally: Option<HarvestTally>,
}

impl HarvestFailure {
    fn new(error: Error, tally: Option<HarvestTally>) -> Self {
        Self { error, tally }
    }
}

impl From<Error> for HarvestFailure {
    fn from(error: Error) -> Self {
        Self { error, tally: None }
    }
}

impl std::fmt::Display for HarvestFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.error.fmt(f)
    }
}

impl IsRetryable for HarvestFailure {
    fn is_retryable(&self) -> bool {
        self.error.is_retryable()
    }
}

/// Result of one set, as collected by the scheduler
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SetOutcome {
    /// The fetch loop ran to the end of the listing
    Harvested(HarvestTally),
    /// The set-level attempt did not complete
    Failed {
        /// Error text of the last attempt
        error: String,
        /// True when retries were exhausted on a transient fault
        transient: bool,
        /// Accounting of the last attempt, if any page arrived
        tally: Option<HarvestTally>,
    },
}

impl SetOutcome {
    /// True for [`SetOutcome::Failed`]
    pub fn is_failure(&self) -> bool {
        matches!(self, SetOutcome::Failed { .. })
    }

    /// Accounting of the attempt, if any
    pub fn tally(&self) -> Option<HarvestTally> {
        match self {
            SetOutcome::Harvested(tally) => Some(*tally),
            SetOutcome::Failed { tally, .. } => *tally,
        }
    }
}

/// One set and what happened to it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SetResult {
    /// The set
    pub set: SetId,
    /// Its outcome
    pub outcome: SetOutcome,
}

/// Work performed by the scheduler for each set of a shard
#[async_trait]
pub trait SetWorker: Send + Sync + 'static {
    /// Harvest one set; faults are reported in the outcome, never raised
    async fn process(&self, set: &SetId) -> SetOutcome;
}

/// How records of a set are retrieved
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum HarvestMethod {
    /// Paginated `ListRecords`
    #[default]
    ListRecords,
    /// Paginated `ListIdentifiers`, then `GetRecord` per identifier
    ListIdentifiers,
}

/// Entries of one record, one per output format in layout order
type RenderedRecord = Vec<(String, Vec<u8>)>;

/// Fetches one set into its archives
#[derive(Clone)]
pub struct SetHarvester {
    client: Arc<dyn OaiClient>,
    layout: StorageLayout,
    renderers: Renderers,
    metadata_prefix: String,
    from: Option<String>,
    method: HarvestMethod,
    log_interval: Duration,
}

impl SetHarvester {
    /// Harvester writing into `layout` with `ListRecords` and no `from` bound
    pub fn new(
        client: Arc<dyn OaiClient>,
        layout: StorageLayout,
        metadata_prefix: impl Into<String>,
    ) -> Self {
        Self {
            client,
            layout,
            renderers: Renderers::default(),
            metadata_prefix: metadata_prefix.into(),
            from: None,
            method: HarvestMethod::default(),
            log_interval: Duration::ZERO,
        }
    }

    /// Use `method` to retrieve records
    pub fn with_method(mut self, method: HarvestMethod) -> Self {
        self.method = method;
        self
    }

    /// Only request records changed since `from`
    pub fn with_from(mut self, from: Option<String>) -> Self {
        self.from = from;
        self
    }

    /// Use `renderers` to produce archive entries
    pub fn with_renderers(mut self, renderers: Renderers) -> Self {
        self.renderers = renderers;
        self
    }

    /// Log per-set progress every `interval` (zero disables it)
    pub fn with_log_interval(mut self, interval: Duration) -> Self {
        self.log_interval = interval;
        self
    }

    /// Harvest `set` into one archive per format
    ///
    /// Archives are finalized and given a fresh checksum sidecar once the
    /// listing is exhausted, even when fewer records arrived than announced.
    pub async fn harvest(&self, set: &SetId) -> std::result::Result<HarvestTally, HarvestFailure> {
        let formats = self.layout.formats().to_vec();
        let mut writers = self.open_writers(set)?;

        let mut progress = ProgressLogger::new(format!("Set {set}"), None, self.log_interval);
        let mut hint: Option<u64> = None;
        let mut received: u64 = 0;
        let mut written: u64 = 0;
        let mut request = ListRequest::for_set(&self.metadata_prefix, set, self.from.as_deref());
        let mut first_page = true;

        loop {
            let tally = (!first_page).then(|| HarvestTally {
                expected: hint.unwrap_or(received),
                written,
            });
            let page = match self.fetch_page(set, request).await {
                Ok(page) => page,
                Err(e) => return Err(abandon(set, writers, e, tally).await),
            };
            first_page = false;

            if hint.is_none() {
                hint = page.complete_list_size;
                progress.set_total(hint);
            }
            received += page.delivered;

            let rendered = self.render_page(set, &formats, &page.records);
            let count = rendered.len() as u64;
            let (kept, appended) = write_page(writers, rendered).await;
            writers = kept;
            if let Err(e) = appended {
                let tally = HarvestTally {
                    expected: hint.unwrap_or(received),
                    written,
                };
                return Err(abandon(set, writers, e, Some(tally)).await);
            }
            written += count;
            progress.log_progress(written);

            match page.next {
                Some(next) => request = next,
                None => break,
            }
        }

        let tally = HarvestTally {
            expected: hint.unwrap_or(received),
            written,
        };
        if let Err(e) = self.finalize(set, writers).await {
            return Err(HarvestFailure::new(e, Some(tally)));
        }

        if tally.failed_records() > 0 {
            tracing::warn!(
                set = %set,
                expected = tally.expected,
                written = tally.written,
                failed_records = tally.failed_records(),
                "Set harvested with missing records"
            );
        } else {
            tracing::info!(set = %set, records = written, "Set harvested");
        }
        Ok(tally)
    }

    /// Truncate the set's archives and drop their stale sidecars
    fn open_writers(&self, set: &SetId) -> Result<Vec<ArchiveWriter>> {
        let mut writers = Vec::with_capacity(self.layout.formats().len());
        for format in self.layout.formats() {
            std::fs::create_dir_all(self.layout.format_dir(format))?;
            remove_stale_checksum(&self.layout.checksum_path(format, set))?;
            writers.push(ArchiveWriter::create(&self.layout.archive_path(format, set))?);
        }
        Ok(writers)
    }

    async fn fetch_page(&self, set: &SetId, request: ListRequest) -> Result<FetchedPage> {
        match self.method {
            HarvestMethod::ListRecords => {
                let page = self.client.list_records(request).await?;
                Ok(FetchedPage {
                    complete_list_size: page.complete_list_size(),
                    delivered: page.items.len() as u64,
                    next: page.resumption.as_ref().map(ListRequest::resume),
                    records: page.items,
                })
            }
            HarvestMethod::ListIdentifiers => {
                let page = self.client.list_identifiers(request).await?;
                let mut records = Vec::with_capacity(page.items.len());
                for header in &page.items {
                    match self
                        .client
                        .get_record(&header.identifier, &self.metadata_prefix)
                        .await
                    {
                        Ok(record) => records.push(record),
                        Err(e) if e.is_retryable() => return Err(e),
                        Err(e) => {
                            tracing::warn!(
                                set = %set,
                                identifier = %header.identifier,
                                error = %e,
                                "Failed to fetch record"
                            );
                        }
                    }
                }
                Ok(FetchedPage {
                    complete_list_size: page.complete_list_size(),
                    delivered: page.items.len() as u64,
                    next: page.resumption.as_ref().map(ListRequest::resume),
                    records,
                })
            }
        }
    }

    /// Render every record for every format; a record that fails in any
    /// format is dropped everywhere so the archives stay in step
    fn render_page(
        &self,
        set: &SetId,
        formats: &[OutputFormat],
        records: &[Record],
    ) -> Vec<RenderedRecord> {
        let renderers: Vec<_> = formats
            .iter()
            .map(|f| self.renderers.for_format(&f.name))
            .collect();

        let mut rendered = Vec::with_capacity(records.len());
        'records: for record in records {
            let mut entries = Vec::with_capacity(formats.len());
            for (format, renderer) in formats.iter().zip(&renderers) {
                match renderer.render(record) {
                    Ok(bytes) => entries.push((
                        entry_name(&record.header.identifier, &format.extension),
                        bytes,
                    )),
                    Err(e) => {
                        tracing::warn!(
                            set = %set,
                            identifier = %record.header.identifier,
                            format = %format.name,
                            error = %e,
                            "Skipping record that could not be rendered"
                        );
                        continue 'records;
                    }
                }
            }
            rendered.push(entries);
        }
        rendered
    }

    async fn finalize(&self, set: &SetId, writers: Vec<ArchiveWriter>) -> Result<()> {
        for writer in writers {
            let path = writer.path().to_path_buf();
            tokio::task::spawn_blocking(move || writer.finish()).await??;
            let digest = write_checksum(path.clone()).await?;
            tracing::debug!(set = %set, archive = %path.display(), %digest, "Checksum written");
        }
        Ok(())
    }
}

struct FetchedPage {
    records: Vec<Record>,
    delivered: u64,
    complete_list_size: Option<u64>,
    next: Option<ListRequest>,
}

fn remove_stale_checksum(path: &std::path::Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Append one page to every archive on a blocking thread
///
/// The writers come back even when an entry fails, so the caller can close
/// them; only a panicked task loses them.
async fn write_page(
    writers: Vec<ArchiveWriter>,
    rendered: Vec<RenderedRecord>,
) -> (Vec<ArchiveWriter>, Result<()>) {
    if rendered.is_empty() {
        return (writers, Ok(()));
    }
    let task = tokio::task::spawn_blocking(move || {
        let mut writers = writers;
        let appended = append_entries(&mut writers, rendered);
        (writers, appended)
    });
    match task.await {
        Ok(done) => done,
        Err(e) => (Vec::new(), Err(e.into())),
    }
}

fn append_entries(writers: &mut [ArchiveWriter], rendered: Vec<RenderedRecord>) -> Result<()> {
    for entries in rendered {
        for (writer, (name, bytes)) in writers.iter_mut().zip(entries) {
            writer.add_entry(&name, &bytes)?;
        }
    }
    Ok(())
}

/// End an attempt that broke off mid-listing
async fn abandon(
    set: &SetId,
    writers: Vec<ArchiveWriter>,
    error: Error,
    tally: Option<HarvestTally>,
) -> HarvestFailure {
    tracing::warn!(set = %set, error = %error, "Set harvest broke off, closing partial archives");
    finish_partial(set, writers).await;
    HarvestFailure::new(error, tally)
}

/// Close the archives of an aborted attempt so they stay readable; no checksum
async fn finish_partial(set: &SetId, writers: Vec<ArchiveWriter>) {
    let result = tokio::task::spawn_blocking(move || {
        for writer in writers {
            writer.finish()?;
        }
        Ok::<_, Error>(())
    })
    .await;
    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(set = %set, error = %e, "Failed to close partial archive"),
        Err(e) => tracing::warn!(set = %set, error = %e, "Partial archive task failed"),
    }
}

/// [`SetHarvester`] behind the retry policy
#[derive(Clone)]
pub struct RetryingHarvester {
    harvester: SetHarvester,
    retry: RetryConfig,
}

impl RetryingHarvester {
    /// Retry `harvester` according to `retry`
    pub fn new(harvester: SetHarvester, retry: RetryConfig) -> Self {
        Self { harvester, retry }
    }
}

#[async_trait]
impl SetWorker for RetryingHarvester {
    async fn process(&self, set: &SetId) -> SetOutcome {
        match with_retry(&self.retry, set.as_str(), || self.harvester.harvest(set)).await {
            Ok(tally) => SetOutcome::Harvested(tally),
            Err(failure) => SetOutcome::Failed {
                transient: failure.is_retryable(),
                error: failure.error.to_string(),
                tally: failure.tally,
            },
        }
    }
}
