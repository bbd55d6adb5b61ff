//! Core types for oaipmh-dl

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::{Error, Result};

/// Identifier of a set in the remote catalog
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SetId(String);

impl SetId {
    /// Create a new SetId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SetId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for SetId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::borrow::Borrow<str> for SetId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle label of a set's artifact after a run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArtifactStatus {
    /// First harvested during this run
    New,
    /// Existed before and was rewritten with new content
    Changed,
    /// Not touched since the last harvest
    Unchanged,
    /// Recreated from scratch although a previous harvest exists
    Reharvested,
    /// Removed because the set is no longer published
    Deleted,
    /// Requested but never attempted or recorded
    NotAvailable,
}

impl ArtifactStatus {
    /// All statuses in report order
    pub const ALL: [ArtifactStatus; 6] = [
        ArtifactStatus::New,
        ArtifactStatus::Changed,
        ArtifactStatus::Unchanged,
        ArtifactStatus::Reharvested,
        ArtifactStatus::Deleted,
        ArtifactStatus::NotAvailable,
    ];

    /// Label used in reports and CSV files
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactStatus::New => "NEW",
            ArtifactStatus::Changed => "CHANGED",
            ArtifactStatus::Unchanged => "UNCHANGED",
            ArtifactStatus::Reharvested => "REHARVESTED",
            ArtifactStatus::Deleted => "DELETED",
            ArtifactStatus::NotAvailable => "NOT_AVAILABLE",
        }
    }
}

impl std::fmt::Display for ArtifactStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operation selected at process start
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verb {
    /// Harvest sets by listing identifiers and fetching each record
    ListIdentifiers,
    /// Harvest sets with paginated record listings
    ListRecords,
    /// Traverse the set catalog only
    ListSets,
    /// Create missing checksum sidecars
    CheckSum,
}

impl Verb {
    /// Parse a configured verb name
    ///
    /// An empty name is a configuration error; an unknown name yields `None`
    /// so the caller can skip the run.
    pub fn parse(name: &str) -> Result<Option<Verb>> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::config(
                "no operation name configured",
                "harvest.verb",
            ));
        }
        Ok(match name {
            "ListIdentifiers" => Some(Verb::ListIdentifiers),
            "ListRecords" => Some(Verb::ListRecords),
            "ListSets" => Some(Verb::ListSets),
            "CheckSum" => Some(Verb::CheckSum),
            _ => None,
        })
    }

    /// Protocol name of the verb
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::ListIdentifiers => "ListIdentifiers",
            Verb::ListRecords => "ListRecords",
            Verb::ListSets => "ListSets",
            Verb::CheckSum => "CheckSum",
        }
    }
}

impl std::fmt::Display for Verb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which sets a harvest run covers
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SetSelection {
    /// Sets changed since the last harvest (everything on the first run)
    Incremental,
    /// The whole current catalog
    All,
    /// A caller-supplied list; never consults the catalog
    Explicit(Vec<SetId>),
}

impl SetSelection {
    /// Parse the configured selection string
    ///
    /// `""` is incremental, `"ALL"` is the whole catalog, anything else is a
    /// comma-separated list (blank entries and duplicates dropped).
    pub fn parse(raw: &str) -> SetSelection {
        let raw = raw.trim();
        if raw.is_empty() {
            return SetSelection::Incremental;
        }
        if raw == "ALL" {
            return SetSelection::All;
        }
        let mut sets: Vec<SetId> = Vec::new();
        for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            if !sets.iter().any(|s| s.as_str() == part) {
                sets.push(SetId::from(part));
            }
        }
        if sets.is_empty() {
            SetSelection::Incremental
        } else {
            SetSelection::Explicit(sets)
        }
    }

    /// True when the run is derived from the server catalog
    pub fn is_unconstrained(&self) -> bool {
        !matches!(self, SetSelection::Explicit(_))
    }
}

/// How a scheduled run came about
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    /// Whole catalog (first run or `ALL`)
    Full,
    /// Sets changed since the last harvest
    Selective,
    /// Caller-supplied set list
    Explicit,
    /// Re-harvest of the failure ledger
    Retry,
}

impl RunKind {
    /// True for runs whose set list came from the catalog
    pub fn is_unconstrained(&self) -> bool {
        matches!(self, RunKind::Full | RunKind::Selective)
    }
}

/// Harvest run record handed to reporting
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunSummary {
    /// How the run was selected
    pub kind: RunKind,
    /// Number of sets requested
    pub requested: usize,
    /// Number of sets harvested without a set-level failure
    pub harvested: usize,
    /// Run start
    pub started_at: DateTime<Utc>,
    /// Wall-clock duration of the run
    pub elapsed: Duration,
    /// Records written per harvested set
    pub record_counts: BTreeMap<String, u64>,
    /// Artifact status per set
    pub statuses: BTreeMap<String, ArtifactStatus>,
    /// Records the repository announced but did not deliver, per set
    pub failed_records: BTreeMap<String, u64>,
    /// Sets requested but not harvested
    pub failed_sets: Vec<SetId>,
    /// Reconciliation text of a retry pass
    pub retry_summary: Option<String>,
    /// True when the run was cancelled before all shards finished
    pub interrupted: bool,
}

impl RunSummary {
    /// Empty record for a run that starts now
    pub fn new(kind: RunKind, requested: usize, started_at: DateTime<Utc>) -> Self {
        Self {
            kind,
            requested,
            harvested: 0,
            started_at,
            elapsed: Duration::ZERO,
            record_counts: BTreeMap::new(),
            statuses: BTreeMap::new(),
            failed_records: BTreeMap::new(),
            failed_sets: Vec::new(),
            retry_summary: None,
            interrupted: false,
        }
    }

    /// Status of one set, if recorded
    pub fn status(&self, set: &str) -> Option<ArtifactStatus> {
        self.statuses.get(set).copied()
    }

    /// Number of sets carrying the given status
    pub fn count(&self, status: ArtifactStatus) -> usize {
        self.statuses.values().filter(|s| **s == status).count()
    }
}
