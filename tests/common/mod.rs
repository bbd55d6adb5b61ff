//! Common utilities for oaipmh-dl integration tests
//!
//! [`MemoryRepository`] is a mutable in-memory OAI-PMH repository: tests
//! publish, change and withdraw sets between runs and script transient or
//! permanent faults per set.

#![allow(dead_code)]

use async_trait::async_trait;
use oaipmh_dl::protocol::{ListRequest, OaiClient, Page, Record, RecordHeader, ResumptionToken};
use oaipmh_dl::{Config, Error, Result};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

#[derive(Clone, Default)]
struct PublishedSet {
    records: Vec<Record>,
    /// Announced size when it differs from what is served
    announced: Option<u64>,
}

#[derive(Default)]
struct State {
    sets: BTreeMap<String, PublishedSet>,
    changed: Option<Vec<String>>,
    transient: HashMap<String, u32>,
    permanent: HashSet<String>,
    initial_calls: HashMap<String, usize>,
}

/// In-memory repository serving records in pages of `page_size`
pub struct MemoryRepository {
    page_size: usize,
    state: Mutex<State>,
}

impl MemoryRepository {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            state: Mutex::new(State::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Publish (or replace) `set` with `count` records
    pub fn publish(&self, set: &str, count: usize) {
        let records = (1..=count).map(|n| record(set, n)).collect();
        self.state().sets.insert(
            set.to_string(),
            PublishedSet {
                records,
                announced: None,
            },
        );
    }

    /// Announce `announced` records for `set` while serving what is published
    pub fn announce(&self, set: &str, announced: u64) {
        if let Some(published) = self.state().sets.get_mut(set) {
            published.announced = Some(announced);
        }
    }

    /// Remove `set` from the catalog
    pub fn withdraw(&self, set: &str) {
        self.state().sets.remove(set);
    }

    /// Sets reported by `ListSets` with a `from` date
    pub fn set_changed(&self, sets: &[&str]) {
        self.state().changed = Some(sets.iter().map(|s| s.to_string()).collect());
    }

    /// Answer the next `count` initial listings of `set` with HTTP 503
    pub fn fail_transiently(&self, set: &str, count: u32) {
        self.state().transient.insert(set.to_string(), count);
    }

    /// Answer every listing of `set` with an unparsable response
    pub fn fail_permanently(&self, set: &str) {
        self.state().permanent.insert(set.to_string());
    }

    /// Stop failing `set`
    pub fn heal(&self, set: &str) {
        let mut state = self.state();
        state.permanent.remove(set);
        state.transient.remove(set);
    }

    /// Initial record listings issued for `set` so far
    pub fn initial_calls(&self, set: &str) -> usize {
        self.state().initial_calls.get(set).copied().unwrap_or(0)
    }

    fn page(&self, request: &ListRequest) -> Result<Page<Record>> {
        let mut state = self.state();
        let (set, offset) = match request {
            ListRequest::Initial { set, .. } => {
                let set = set.clone().unwrap_or_default();
                *state.initial_calls.entry(set.clone()).or_default() += 1;
                if state.permanent.contains(&set) {
                    return Err(Error::Parse(format!("unparsable response for {set}")));
                }
                if let Some(left) = state.transient.get_mut(&set).filter(|left| **left > 0) {
                    *left -= 1;
                    return Err(Error::Server {
                        status: 503,
                        url: format!("memory://{set}"),
                    });
                }
                (set, 0)
            }
            ListRequest::Resume { token } => {
                let (set, offset) = token
                    .rsplit_once('@')
                    .and_then(|(set, offset)| Some((set.to_string(), offset.parse().ok()?)))
                    .ok_or_else(|| Error::Protocol {
                        code: "badResumptionToken".into(),
                        message: token.clone(),
                    })?;
                (set, offset)
            }
        };

        // an unknown set matches no records, as an empty listing
        let Some(published) = state.sets.get(&set) else {
            return Ok(Page::empty());
        };
        let end = (offset + self.page_size).min(published.records.len());
        let items = published.records[offset.min(end)..end].to_vec();
        let announced = published
            .announced
            .unwrap_or(published.records.len() as u64);
        let resumption = (end < published.records.len()).then(|| ResumptionToken {
            value: format!("{set}@{end}"),
            complete_list_size: Some(announced),
            cursor: Some(offset as u64),
            expiration: None,
        });
        Ok(Page {
            items,
            resumption,
            complete_list_size: Some(announced),
        })
    }
}

#[async_trait]
impl OaiClient for MemoryRepository {
    async fn list_sets(&self, request: ListRequest) -> Result<Page<String>> {
        let state = self.state();
        let items = match request {
            ListRequest::Initial { from: Some(_), .. } => state
                .changed
                .clone()
                .unwrap_or_else(|| state.sets.keys().cloned().collect()),
            _ => state.sets.keys().cloned().collect(),
        };
        Ok(Page::new(items, None))
    }

    async fn list_records(&self, request: ListRequest) -> Result<Page<Record>> {
        self.page(&request)
    }

    async fn list_identifiers(&self, request: ListRequest) -> Result<Page<RecordHeader>> {
        let page = self.page(&request)?;
        Ok(Page {
            items: page.items.into_iter().map(|r| r.header).collect(),
            resumption: page.resumption,
            complete_list_size: page.complete_list_size,
        })
    }

    async fn get_record(&self, identifier: &str, _metadata_prefix: &str) -> Result<Record> {
        self.state()
            .sets
            .values()
            .flat_map(|s| s.records.iter())
            .find(|r| r.header.identifier == identifier)
            .cloned()
            .ok_or_else(|| Error::Protocol {
                code: "idDoesNotExist".into(),
                message: identifier.to_string(),
            })
    }
}

/// Record `n` of `set`
pub fn record(set: &str, n: usize) -> Record {
    let identifier = format!("/{set}/item_{n}");
    Record {
        metadata: Some(format!("<record id=\"{identifier}\"/>")),
        header: RecordHeader {
            identifier,
            datestamp: Some("2024-01-01T00:00:00Z".into()),
            set_specs: vec![set.to_string()],
            deleted: false,
        },
    }
}

/// Config writing under `root`, with fast retries and no progress logging
pub fn test_config(root: &Path, sets: &str) -> Config {
    let mut config = Config::default();
    config.harvest.endpoint = "memory://repository".into();
    config.harvest.verb = "ListRecords".into();
    config.harvest.sets = sets.into();
    config.harvest.threads = 2;
    config.harvest.log_progress_interval = Duration::ZERO;
    config.storage.output_dir = root.to_path_buf();
    config.retry.delay = Duration::from_millis(1);
    config
}

/// Move the modification time of `path` back by `age`
pub fn age_file(path: &Path, age: Duration) {
    let file = std::fs::File::options()
        .write(true)
        .open(path)
        .unwrap_or_else(|e| panic!("open {}: {e}", path.display()));
    file.set_modified(SystemTime::now() - age)
        .unwrap_or_else(|e| panic!("set mtime of {}: {e}", path.display()));
}
