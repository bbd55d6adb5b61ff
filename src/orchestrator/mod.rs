//! Run orchestration
//!
//! [`Harvester`] is the entry point: it parses the configured verb, decides
//! between a full, selective, explicit or retry run, sequences the differ,
//! scheduler and classifier, and hands every finished run summary to the
//! notifiers.
//!
//! - [`run`] — one scheduled run and its bookkeeping

pub mod run;

use crate::classifier::{FileTimeClassifier, StatusClassifier};
use crate::config::Config;
use crate::differ::{self, DiffScope};
use crate::error::{Error, Result};
use crate::harvester::{HarvestMethod, Renderers, RetryingHarvester, SetHarvester};
use crate::protocol::{HttpOaiClient, OaiClient, fetch_catalog};
use crate::report::{CsvReportWriter, Notifier, SlackNotifier};
use crate::retry::with_retry;
use crate::scheduler::Scheduler;
use crate::storage::StorageLayout;
use crate::storage::checksum::generate_missing;
use crate::storage::inventory::local_inventory;
use crate::storage::ledger::FailureLedger;
use crate::storage::marker::read_marker;
use crate::types::{RunKind, RunSummary, SetId, SetSelection, Verb};
use chrono::Utc;
use run::{RunContext, RunPlan};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// What a verb produced
#[derive(Clone, Debug)]
pub enum VerbOutcome {
    /// `ListRecords` or `ListIdentifiers`
    Harvest {
        /// Summaries of the failed-set retry passes, in order
        retries: Vec<RunSummary>,
        /// The regular run; absent when a retry pass was interrupted
        run: Option<RunSummary>,
    },
    /// `ListSets`
    Catalog {
        /// Catalog snapshot
        sets: Vec<SetId>,
    },
    /// `CheckSum`
    Checksums {
        /// Archives that received a new sidecar
        written: Vec<PathBuf>,
    },
    /// Unrecognized verb; nothing ran
    Skipped {
        /// The configured name
        verb: String,
    },
}

/// Harvests an OAI-PMH repository into per-set archives
pub struct Harvester {
    config: Config,
    client: Option<Arc<dyn OaiClient>>,
    layout: StorageLayout,
    renderers: Renderers,
    classifier: Arc<dyn StatusClassifier>,
    notifiers: Vec<Arc<dyn Notifier>>,
}

impl Harvester {
    /// Harvester talking HTTP to the configured endpoint
    ///
    /// The endpoint may be left empty for `CheckSum`; a malformed one is a
    /// configuration error. The status CSV and Slack notifiers are registered
    /// according to the notification settings.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let client: Option<Arc<dyn OaiClient>> = if config.harvest.endpoint.trim().is_empty() {
            None
        } else {
            let endpoint = config.require_endpoint()?;
            Some(Arc::new(HttpOaiClient::new(
                endpoint,
                config.retry.request_timeout,
            )?))
        };
        let mut harvester = Self::build(config, client);

        let notifications = harvester.config.notifications.clone();
        if notifications.status_csv {
            let root = harvester.layout.root().to_path_buf();
            harvester = harvester.with_notifier(Arc::new(CsvReportWriter::new(root)));
        }
        if let Some(webhook) = notifications.slack_webhook.filter(|w| !w.trim().is_empty()) {
            harvester = harvester.with_notifier(Arc::new(
                SlackNotifier::new(webhook, notifications.timeout)
                    .with_download_server_url(notifications.download_server_url),
            ));
        }
        Ok(harvester)
    }

    /// Harvester using `client` instead of HTTP, with no notifiers
    pub fn with_client(config: Config, client: Arc<dyn OaiClient>) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config, Some(client)))
    }

    fn build(config: Config, client: Option<Arc<dyn OaiClient>>) -> Self {
        let layout = StorageLayout::new(
            config.storage.output_dir.clone(),
            config.harvest.formats.clone(),
        );
        Self {
            classifier: Arc::new(FileTimeClassifier::new(layout.clone())),
            config,
            client,
            layout,
            renderers: Renderers::default(),
            notifiers: Vec::new(),
        }
    }

    /// Use `renderers` for archive entries
    pub fn with_renderers(mut self, renderers: Renderers) -> Self {
        self.renderers = renderers;
        self
    }

    /// Replace the status classifier
    pub fn with_classifier(mut self, classifier: Arc<dyn StatusClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Also deliver run summaries to `notifier`
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    /// Active configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Output layout
    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    /// Execute the configured verb
    ///
    /// Only configuration problems (missing verb or endpoint) and a catalog
    /// that cannot be listed are errors; per-set failures end up in the
    /// returned summaries and the ledger.
    pub async fn run(&self, cancel: CancellationToken) -> Result<VerbOutcome> {
        let Some(verb) = Verb::parse(&self.config.harvest.verb)? else {
            tracing::warn!(verb = %self.config.harvest.verb, "Unknown operation, nothing to do");
            return Ok(VerbOutcome::Skipped {
                verb: self.config.harvest.verb.clone(),
            });
        };
        tracing::info!(%verb, "Starting operation");

        match verb {
            Verb::ListSets => {
                let client = self.client()?;
                let sets = with_retry(&self.config.retry, "catalog", || {
                    fetch_catalog(client.as_ref(), None)
                })
                .await?;
                tracing::info!(sets = sets.len(), "Catalog listed");
                Ok(VerbOutcome::Catalog { sets })
            }
            Verb::CheckSum => {
                let layout = self.layout.clone();
                let zips = self.config.storage.zips_dir.clone();
                let written =
                    tokio::task::spawn_blocking(move || generate_missing(&layout, zips.as_deref()))
                        .await??;
                tracing::info!(created = written.len(), "Checksum generation finished");
                Ok(VerbOutcome::Checksums { written })
            }
            Verb::ListRecords => self.harvest(HarvestMethod::ListRecords, cancel).await,
            Verb::ListIdentifiers => self.harvest(HarvestMethod::ListIdentifiers, cancel).await,
        }
    }

    fn client(&self) -> Result<Arc<dyn OaiClient>> {
        self.client
            .clone()
            .ok_or_else(|| Error::config("endpoint must be set for this verb", "harvest.endpoint"))
    }

    async fn harvest(&self, method: HarvestMethod, cancel: CancellationToken) -> Result<VerbOutcome> {
        let client = self.client()?;
        self.layout.ensure_dirs()?;
        let ledger = FailureLedger::new(self.layout.root());
        let selection = SetSelection::parse(&self.config.harvest.sets);

        let mut retries = Vec::new();
        let mut carried = std::collections::BTreeSet::new();
        if selection.is_unconstrained() {
            for pass in 1..=self.config.harvest.failed_set_passes {
                let failed = match ledger.read() {
                    Ok(failed) => failed,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to read failed sets ledger");
                        break;
                    }
                };
                if failed.is_empty() {
                    break;
                }
                tracing::info!(pass, sets = failed.len(), "Retrying failed sets");
                let mut plan = RunPlan::new(RunKind::Retry, failed);
                plan.previously_held = local_inventory(&self.layout)?;
                plan.last_harvest = read_marker(self.layout.root());
                let summary = self
                    .execute(client.clone(), method, None, &ledger, plan, &cancel)
                    .await;
                carried = summary.failed_sets.iter().cloned().collect();
                self.notify(&summary).await;
                let interrupted = summary.interrupted;
                retries.push(summary);
                if interrupted {
                    return Ok(VerbOutcome::Harvest { retries, run: None });
                }
            }
        }

        let mut plan = match selection {
            SetSelection::Explicit(sets) => {
                let mut plan = RunPlan::new(RunKind::Explicit, sets);
                plan.previously_held = local_inventory(&self.layout)?;
                plan.last_harvest = read_marker(self.layout.root());
                plan
            }
            SetSelection::Incremental | SetSelection::All => {
                // sets changed while the catalog is listed fall into the next window
                let started_at = Utc::now();
                let scope = if selection == SetSelection::All {
                    DiffScope::Everything
                } else {
                    DiffScope::ChangedSince
                };
                let last_harvest = read_marker(self.layout.root());
                let diff = with_retry(&self.config.retry, "catalog", || {
                    differ::plan(client.as_ref(), &self.layout, last_harvest, scope)
                })
                .await?;
                let removed = differ::apply_deletions(&self.layout, &diff);
                if removed > 0 {
                    tracing::info!(sets = diff.to_delete.len(), files = removed, "Removed de-published sets");
                }

                let kind = if diff.first_run || scope == DiffScope::Everything {
                    RunKind::Full
                } else {
                    RunKind::Selective
                };
                let mut plan = RunPlan::new(kind, diff.to_fetch).with_start(started_at);
                plan.deleted = diff.to_delete;
                plan.previously_held = diff.local;
                plan.last_harvest = last_harvest;
                plan
            }
        };
        plan.carried_failures = carried;

        let from = match plan.kind {
            RunKind::Explicit => self.config.harvest.from.clone(),
            _ => None,
        };
        let summary = self
            .execute(client, method, from, &ledger, plan, &cancel)
            .await;
        self.notify(&summary).await;
        Ok(VerbOutcome::Harvest {
            retries,
            run: Some(summary),
        })
    }

    async fn execute(
        &self,
        client: Arc<dyn OaiClient>,
        method: HarvestMethod,
        from: Option<String>,
        ledger: &FailureLedger,
        plan: RunPlan,
        cancel: &CancellationToken,
    ) -> RunSummary {
        let harvest = &self.config.harvest;
        let set_harvester = SetHarvester::new(client, self.layout.clone(), &harvest.metadata_prefix)
            .with_method(method)
            .with_from(from)
            .with_renderers(self.renderers.clone())
            .with_log_interval(harvest.log_progress_interval);
        let worker = Arc::new(RetryingHarvester::new(set_harvester, self.config.retry.clone()));
        let scheduler = Scheduler::new(harvest.threads, harvest.log_progress_interval);

        let ctx = RunContext {
            root: self.layout.root(),
            scheduler: &scheduler,
            worker,
            classifier: self.classifier.as_ref(),
            ledger,
        };
        run::execute(ctx, plan, cancel).await
    }

    async fn notify(&self, summary: &RunSummary) {
        for notifier in &self.notifiers {
            if let Err(e) = notifier.notify(summary).await {
                tracing::warn!(channel = notifier.name(), error = %e, "Failed to deliver run report");
            }
        }
    }
}
