//! OAI-PMH protocol access
//!
//! [`OaiClient`] is the seam between harvesting logic and the wire. The
//! harvester, differ and orchestrator only ever see typed pages; continuation
//! tokens never outlive the listing call that produced them.
//!
//! - [`http`] — reqwest-backed client
//! - [`xml`] — response parsing

pub mod http;
pub mod xml;

use crate::error::Result;
use crate::types::SetId;
use async_trait::async_trait;
use std::collections::BTreeSet;

pub use http::HttpOaiClient;

/// Header of a record as returned by `ListIdentifiers` and inside `ListRecords`
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RecordHeader {
    /// Unique record identifier
    pub identifier: String,
    /// Last modification date as sent by the repository
    pub datestamp: Option<String>,
    /// Sets the record belongs to
    pub set_specs: Vec<String>,
    /// Header carries `status="deleted"`
    pub deleted: bool,
}

/// A harvested record
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Record {
    /// Record header
    pub header: RecordHeader,
    /// Serialized metadata payload (an XML document), absent for deleted records
    pub metadata: Option<String>,
}

/// Continuation state of a paginated listing
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResumptionToken {
    /// Opaque token to send back
    pub value: String,
    /// Total size of the complete list, if announced
    pub complete_list_size: Option<u64>,
    /// Position of the first item of this page, if announced
    pub cursor: Option<u64>,
    /// Token expiry as sent by the repository
    pub expiration: Option<String>,
}

/// One page of a listing
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Page<T> {
    /// Items on this page
    pub items: Vec<T>,
    /// Present while more pages remain
    pub resumption: Option<ResumptionToken>,
    /// `completeListSize` announced on this page, kept when the token itself
    /// is empty and therefore dropped
    pub complete_list_size: Option<u64>,
}

impl<T> Page<T> {
    /// A page with no items and no continuation
    pub fn empty() -> Self {
        Self::new(Vec::new(), None)
    }

    /// Page of `items`, taking the size hint from `resumption`
    pub fn new(items: Vec<T>, resumption: Option<ResumptionToken>) -> Self {
        let complete_list_size = resumption.as_ref().and_then(|t| t.complete_list_size);
        Self {
            items,
            resumption,
            complete_list_size,
        }
    }

    /// Announced size of the complete list, if any
    pub fn complete_list_size(&self) -> Option<u64> {
        self.complete_list_size
            .or_else(|| self.resumption.as_ref().and_then(|t| t.complete_list_size))
    }
}

/// Arguments of a listing request
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ListRequest {
    /// First request of a listing
    Initial {
        /// Metadata prefix (ignored by `ListSets`)
        metadata_prefix: Option<String>,
        /// Restrict to one set
        set: Option<String>,
        /// Only items changed since this date
        from: Option<String>,
    },
    /// Follow-up request carrying a continuation token
    Resume {
        /// Token value from the previous page
        token: String,
    },
}

impl ListRequest {
    /// Initial request for the records of one set
    pub fn for_set(metadata_prefix: &str, set: &SetId, from: Option<&str>) -> Self {
        ListRequest::Initial {
            metadata_prefix: Some(metadata_prefix.to_string()),
            set: Some(set.to_string()),
            from: from.map(str::to_string),
        }
    }

    /// Initial `ListSets` request, optionally limited to sets changed since `from`
    pub fn sets(from: Option<&str>) -> Self {
        ListRequest::Initial {
            metadata_prefix: None,
            set: None,
            from: from.map(str::to_string),
        }
    }

    /// Continuation of a listing
    pub fn resume(token: &ResumptionToken) -> Self {
        ListRequest::Resume {
            token: token.value.clone(),
        }
    }
}

/// Access to an OAI-PMH repository
#[async_trait]
pub trait OaiClient: Send + Sync {
    /// One page of `ListSets`, yielding set specs
    async fn list_sets(&self, request: ListRequest) -> Result<Page<String>>;

    /// One page of `ListRecords`
    async fn list_records(&self, request: ListRequest) -> Result<Page<Record>>;

    /// One page of `ListIdentifiers`
    async fn list_identifiers(&self, request: ListRequest) -> Result<Page<RecordHeader>>;

    /// A single record via `GetRecord`
    async fn get_record(&self, identifier: &str, metadata_prefix: &str) -> Result<Record>;
}

/// Traverse `ListSets` until the listing is exhausted
///
/// With `from` set, only sets changed since that date are returned (the
/// repository's "changed since" query). Duplicates are dropped, first
/// occurrence wins.
pub async fn fetch_catalog(client: &dyn OaiClient, from: Option<&str>) -> Result<Vec<SetId>> {
    let mut seen = BTreeSet::new();
    let mut catalog = Vec::new();
    let mut page = client.list_sets(ListRequest::sets(from)).await?;

    loop {
        for spec in page.items.drain(..) {
            if seen.insert(spec.clone()) {
                catalog.push(SetId::from(spec));
            }
        }
        let Some(token) = page.resumption.take() else {
            break;
        };
        page = client.list_sets(ListRequest::resume(&token)).await?;
    }

    tracing::debug!(sets = catalog.len(), ?from, "ListSets traversal finished");
    Ok(catalog)
}
