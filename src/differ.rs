//! Set inventory differ
//!
//! Compares the repository catalog with what is on disk and decides which
//! sets a catalog-driven run fetches and which it deletes.

use crate::error::Result;
use crate::protocol::{OaiClient, fetch_catalog};
use crate::storage::StorageLayout;
use crate::storage::inventory::{local_inventory, remove_set};
use crate::types::SetId;
use crate::utils::format_harvest_date;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

/// Which part of the catalog a run wants
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiffScope {
    /// Only sets changed since the last harvest
    ChangedSince,
    /// Every set in the catalog
    Everything,
}

/// Work decided by the differ
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DiffPlan {
    /// Sets to harvest, in catalog order
    pub to_fetch: Vec<SetId>,
    /// Sets held locally but no longer published
    pub to_delete: Vec<SetId>,
    /// No previous harvest is known
    pub first_run: bool,
    /// Local inventory before any deletion
    pub local: BTreeSet<SetId>,
}

/// Decide what to fetch and delete
///
/// Without `last_harvest` the whole catalog is fetched and nothing is
/// deleted. Otherwise de-published sets are the local inventory minus the
/// catalog, and the fetch list is either the repository's "changed since"
/// listing or, for [`DiffScope::Everything`], the whole catalog.
pub async fn plan(
    client: &dyn OaiClient,
    layout: &StorageLayout,
    last_harvest: Option<DateTime<Utc>>,
    scope: DiffScope,
) -> Result<DiffPlan> {
    let local = local_inventory(layout)?;
    let catalog = fetch_catalog(client, None).await?;

    let Some(last_harvest) = last_harvest else {
        tracing::info!(catalog = catalog.len(), "First harvest, fetching the whole catalog");
        return Ok(DiffPlan {
            to_fetch: catalog,
            to_delete: Vec::new(),
            first_run: true,
            local,
        });
    };

    let published: BTreeSet<&SetId> = catalog.iter().collect();
    let to_delete: Vec<SetId> = local
        .iter()
        .filter(|set| !published.contains(set))
        .cloned()
        .collect();

    let to_fetch = match scope {
        DiffScope::Everything => catalog,
        DiffScope::ChangedSince => {
            let since = format_harvest_date(last_harvest);
            fetch_catalog(client, Some(&since)).await?
        }
    };

    tracing::info!(
        local = local.len(),
        to_fetch = to_fetch.len(),
        to_delete = to_delete.len(),
        ?scope,
        "Computed set differences"
    );
    Ok(DiffPlan {
        to_fetch,
        to_delete,
        first_run: false,
        local,
    })
}

/// Remove the artifacts of every de-published set in every representation
///
/// Returns the number of files removed.
pub fn apply_deletions(layout: &StorageLayout, plan: &DiffPlan) -> usize {
    plan.to_delete
        .iter()
        .map(|set| remove_set(layout, set))
        .sum()
}
