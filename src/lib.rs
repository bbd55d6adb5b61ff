//! # oaipmh-dl
//!
//! Incremental, fault-tolerant bulk harvester for OAI-PMH repositories.
//!
//! Every set of the repository is packaged into one zip archive per output
//! format, with an MD5 sidecar next to it. Between runs the harvester keeps
//! two small state files under the output root: the date of the last
//! catalog-driven harvest, and a ledger of sets that did not make it, which
//! are retried first on the next run.
//!
//! ## Design Philosophy
//!
//! - **Failures are data** - a broken set never aborts the run; it is retried,
//!   counted and written to the ledger
//! - **Library-first** - the binary is a thin wrapper around [`Harvester`]
//! - **Swappable collaborators** - transport, rendering, status classification
//!   and notification all sit behind traits
//!
//! ## Quick Start
//!
//! ```no_run
//! use oaipmh_dl::{Config, Harvester};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Config::default();
//!     config.harvest.endpoint = "https://repository.example/oai".to_string();
//!     config.harvest.sets = "ALL".to_string();
//!
//!     let harvester = Harvester::new(config)?;
//!     let outcome = harvester.run(CancellationToken::new()).await?;
//!     println!("{outcome:?}");
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Artifact status classification
pub mod classifier;
/// Configuration types
pub mod config;
/// Set inventory differ
pub mod differ;
/// Error types
pub mod error;
/// Per-set harvesting
pub mod harvester;
/// Verb dispatch and run sequencing
pub mod orchestrator;
/// Throttled progress logging
pub mod progress;
/// OAI-PMH client and response parsing
pub mod protocol;
/// Run summaries and notifiers
pub mod report;
/// Retry logic with a fixed delay
pub mod retry;
/// Sharded work scheduling
pub mod scheduler;
/// On-disk artifacts and run state
pub mod storage;
/// Core types
pub mod types;
/// Utility functions
pub mod utils;

#[cfg(test)]
pub(crate) mod test_helpers;

// Re-export commonly used types
pub use classifier::{FileTimeClassifier, StatusClassifier};
pub use config::{Config, OutputFormat};
pub use error::{Error, Result};
pub use harvester::{HarvestTally, RecordRenderer, Renderers, SetOutcome};
pub use orchestrator::{Harvester, VerbOutcome};
pub use protocol::{HttpOaiClient, OaiClient};
pub use report::{MailTransport, Notifier};
pub use types::{ArtifactStatus, RunKind, RunSummary, SetId, SetSelection, Verb};

use tokio_util::sync::CancellationToken;

/// Run the configured verb, cancelling it on a termination signal
///
/// A signal stops the scheduler; the ledger is still written from what was
/// confirmed and the summary comes back flagged as interrupted.
///
/// # Example
///
/// ```no_run
/// use oaipmh_dl::{Config, Harvester, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let harvester = Harvester::new(Config::default())?;
///     run_with_shutdown(&harvester).await?;
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(harvester: &Harvester) -> Result<VerbOutcome> {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let watcher = tokio::spawn(async move {
        tokio::select! {
            _ = wait_for_signal() => {
                tracing::warn!("Shutting down, waiting for running sets to stop");
                trigger.cancel();
            }
            _ = trigger.cancelled() => {}
        }
    });

    let outcome = harvester.run(cancel.clone()).await;
    // stop the watcher once the run is over
    cancel.cancel();
    watcher.await.ok();
    outcome
}

/// Resolves on SIGTERM or SIGINT; Ctrl+C elsewhere
#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let terminate = signal(SignalKind::terminate());
    let interrupt = signal(SignalKind::interrupt());
    match (terminate, interrupt) {
        (Ok(mut terminate), Ok(mut interrupt)) => {
            let name = tokio::select! {
                _ = terminate.recv() => "SIGTERM",
                _ = interrupt.recv() => "SIGINT",
            };
            tracing::info!(signal = name, "Termination signal received");
        }
        (Ok(mut only), Err(e)) | (Err(e), Ok(mut only)) => {
            tracing::warn!(error = %e, "Listening for one termination signal only");
            only.recv().await;
            tracing::info!("Termination signal received");
        }
        (Err(e), Err(_)) => {
            tracing::warn!(error = %e, "Signal handlers unavailable, falling back to Ctrl+C");
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Cannot listen for Ctrl+C either");
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Cannot listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    tracing::info!("Ctrl+C received");
}
