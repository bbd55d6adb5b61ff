//! Artifact status classification
//!
//! Status is inferred from archive timestamps relative to the previous
//! harvest and the current run start. The inference sits behind
//! [`StatusClassifier`] so callers don't depend on filesystem timestamps.

use crate::storage::StorageLayout;
use crate::types::{ArtifactStatus, SetId};
use chrono::{DateTime, Utc};

/// Timestamps of one artifact
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArtifactTimes {
    /// Creation time, where the filesystem records one
    pub created: Option<DateTime<Utc>>,
    /// Last modification time
    pub modified: DateTime<Utc>,
}

/// Run-level facts the classification depends on
#[derive(Clone, Copy, Debug)]
pub struct ClassifyContext {
    /// Start of the previous unconstrained harvest
    pub last_harvest: Option<DateTime<Utc>>,
    /// Start of this run
    pub run_start: DateTime<Utc>,
}

/// Lifecycle label from artifact timestamps
///
/// `previously_held` says whether the set had an artifact before this run
/// started; a set that did not is treated as created during this run.
pub fn classify(
    times: ArtifactTimes,
    previously_held: bool,
    last_harvest: Option<DateTime<Utc>>,
    run_start: DateTime<Utc>,
) -> ArtifactStatus {
    let created_this_run =
        !previously_held || times.created.is_some_and(|created| created >= run_start);

    let Some(last_harvest) = last_harvest else {
        return if created_this_run {
            ArtifactStatus::New
        } else {
            ArtifactStatus::Changed
        };
    };

    if times.modified <= last_harvest {
        ArtifactStatus::Unchanged
    } else if !previously_held {
        ArtifactStatus::New
    } else if created_this_run {
        ArtifactStatus::Reharvested
    } else {
        ArtifactStatus::Changed
    }
}

/// Decides the status of a set's artifact after a run
pub trait StatusClassifier: Send + Sync {
    /// Status of `set`; `previously_held` as for [`classify`]
    fn status(&self, set: &SetId, previously_held: bool, context: &ClassifyContext)
    -> ArtifactStatus;
}

/// Classifies by the timestamps of the primary format's archive
#[derive(Clone, Debug)]
pub struct FileTimeClassifier {
    layout: StorageLayout,
}

impl FileTimeClassifier {
    /// Classifier reading archives under `layout`
    pub fn new(layout: StorageLayout) -> Self {
        Self { layout }
    }

    fn times(&self, set: &SetId) -> Option<ArtifactTimes> {
        let format = self.layout.primary_format()?;
        let path = self.layout.archive_path(format, set);
        let metadata = match std::fs::metadata(&path) {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::debug!(set = %set, archive = %path.display(), error = %e, "No archive to classify");
                return None;
            }
        };
        let modified = metadata.modified().ok()?;
        Some(ArtifactTimes {
            created: metadata.created().ok().map(DateTime::<Utc>::from),
            modified: DateTime::<Utc>::from(modified),
        })
    }
}

impl StatusClassifier for FileTimeClassifier {
    fn status(
        &self,
        set: &SetId,
        previously_held: bool,
        context: &ClassifyContext,
    ) -> ArtifactStatus {
        match self.times(set) {
            Some(times) => classify(times, previously_held, context.last_harvest, context.run_start),
            None => ArtifactStatus::NotAvailable,
        }
    }
}
