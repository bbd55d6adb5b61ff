//! In-memory repository used by unit tests

use crate::error::{Error, Result};
use crate::protocol::{ListRequest, OaiClient, Page, Record, RecordHeader, ResumptionToken};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

#[derive(Default)]
struct ScriptedSet {
    pages: Vec<Vec<Record>>,
    complete_list_size: Option<u64>,
}

/// Repository whose catalog, pages and faults are scripted up front
#[derive(Default)]
pub(crate) struct ScriptedClient {
    catalog: Vec<String>,
    changed: Option<Vec<String>>,
    sets: HashMap<String, ScriptedSet>,
    transient: Mutex<HashMap<String, u32>>,
    permanent: HashSet<String>,
    missing_records: HashSet<String>,
    calls: Mutex<Vec<String>>,
    catalog_queries: Mutex<Vec<DateTime<Utc>>>,
}

impl ScriptedClient {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn catalog(mut self, sets: &[&str]) -> Self {
        self.catalog = sets.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Answer to `ListSets` with a `from` argument
    pub(crate) fn changed_since(mut self, sets: &[&str]) -> Self {
        self.changed = Some(sets.iter().map(|s| s.to_string()).collect());
        self
    }

    /// Serve `set` as pages of the given sizes
    pub(crate) fn pages(mut self, set: &str, sizes: &[usize]) -> Self {
        let mut n = 0;
        let pages = sizes
            .iter()
            .map(|size| {
                (0..*size)
                    .map(|_| {
                        n += 1;
                        record(set, n)
                    })
                    .collect()
            })
            .collect();
        self.sets.entry(set.to_string()).or_default().pages = pages;
        self
    }

    pub(crate) fn complete_list_size(mut self, set: &str, size: u64) -> Self {
        self.sets.entry(set.to_string()).or_default().complete_list_size = Some(size);
        self
    }

    /// Fail the first `count` initial listings of `set` with HTTP 503
    pub(crate) fn transient_failures(self, set: &str, count: u32) -> Self {
        self.transient
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(set.to_string(), count);
        self
    }

    /// Fail every listing of `set` with a malformed response
    pub(crate) fn permanent_failure(mut self, set: &str) -> Self {
        self.permanent.insert(set.to_string());
        self
    }

    /// `GetRecord` for this identifier answers `idDoesNotExist`
    pub(crate) fn missing_record(mut self, identifier: &str) -> Self {
        self.missing_records.insert(identifier.to_string());
        self
    }

    /// Number of initial record listings issued for `set`
    pub(crate) fn initial_calls(&self, set: &str) -> usize {
        let needle = format!("initial:{set}");
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|c| **c == needle)
            .count()
    }

    /// When each `ListSets` request arrived
    pub(crate) fn catalog_queries(&self) -> Vec<DateTime<Utc>> {
        self.catalog_queries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn record_page(&self, request: &ListRequest) -> Result<(String, usize)> {
        match request {
            ListRequest::Initial { set, .. } => {
                let set = set.clone().unwrap_or_default();
                self.calls
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .push(format!("initial:{set}"));
                if self.permanent.contains(&set) {
                    return Err(Error::Parse(format!("malformed response for {set}")));
                }
                let mut transient = self.transient.lock().unwrap_or_else(|e| e.into_inner());
                if let Some(left) = transient.get_mut(&set) {
                    if *left > 0 {
                        *left -= 1;
                        return Err(Error::Server {
                            status: 503,
                            url: format!("scripted://{set}"),
                        });
                    }
                }
                Ok((set, 0))
            }
            ListRequest::Resume { token } => {
                let (set, index) = token
                    .rsplit_once('|')
                    .ok_or_else(|| Error::Other(format!("bad token {token}")))?;
                let index = index
                    .parse()
                    .map_err(|_| Error::Other(format!("bad token {token}")))?;
                Ok((set.to_string(), index))
            }
        }
    }

    fn page_of(&self, set: &str, index: usize) -> Page<Record> {
        let Some(scripted) = self.sets.get(set) else {
            return Page::empty();
        };
        let items = scripted.pages.get(index).cloned().unwrap_or_default();
        let resumption = (index + 1 < scripted.pages.len()).then(|| ResumptionToken {
            value: format!("{set}|{}", index + 1),
            complete_list_size: scripted.complete_list_size,
            ..Default::default()
        });
        Page {
            items,
            resumption,
            complete_list_size: scripted.complete_list_size,
        }
    }
}

pub(crate) fn record(set: &str, n: usize) -> Record {
    let identifier = format!("/{set}/rec_{n}");
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

#[async_trait]
impl OaiClient for ScriptedClient {
    async fn list_sets(&self, request: ListRequest) -> Result<Page<String>> {
        self.catalog_queries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Utc::now());
        let items = match request {
            ListRequest::Initial { from: Some(_), .. } => {
                self.changed.clone().unwrap_or_else(|| self.catalog.clone())
            }
            _ => self.catalog.clone(),
        };
        Ok(Page::new(items, None))
    }

    async fn list_records(&self, request: ListRequest) -> Result<Page<Record>> {
        let (set, index) = self.record_page(&request)?;
        Ok(self.page_of(&set, index))
    }

    async fn list_identifiers(&self, request: ListRequest) -> Result<Page<RecordHeader>> {
        let (set, index) = self.record_page(&request)?;
        let page = self.page_of(&set, index);
        Ok(Page {
            items: page.items.into_iter().map(|r| r.header).collect(),
            resumption: page.resumption,
            complete_list_size: page.complete_list_size,
        })
    }

    async fn get_record(&self, identifier: &str, _metadata_prefix: &str) -> Result<Record> {
        if self.missing_records.contains(identifier) {
            return Err(Error::Protocol {
                code: "idDoesNotExist".into(),
                message: identifier.to_string(),
            });
        }
        self.sets
            .values()
            .flat_map(|s| s.pages.iter().flatten())
            .find(|r| r.header.identifier == identifier)
            .cloned()
            .ok_or_else(|| Error::Protocol {
                code: "idDoesNotExist".into(),
                message: identifier.to_string(),
            })
    }
}
