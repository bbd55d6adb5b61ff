//! oaipmh-dl command line front end
//!
//! Loads an optional JSON config, applies command line overrides and runs the
//! configured verb until it finishes or a termination signal arrives.

use clap::Parser;
use oaipmh_dl::{Config, Error, Harvester, VerbOutcome, run_with_shutdown};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Incremental bulk harvester for OAI-PMH repositories
#[derive(Debug, Parser)]
#[command(name = "oaipmh-dl", version, about)]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, env = "OAIPMH_CONFIG")]
    config: Option<PathBuf>,

    /// Verb to execute (ListRecords, ListIdentifiers, ListSets, CheckSum)
    #[arg(long, env = "OAIPMH_VERB")]
    verb: Option<String>,

    /// Base URL of the OAI-PMH endpoint
    #[arg(short, long, env = "OAIPMH_ENDPOINT")]
    endpoint: Option<String>,

    /// Output root directory
    #[arg(short, long, env = "OAIPMH_OUTPUT")]
    output: Option<PathBuf>,

    /// Comma-separated set ids, or ALL
    #[arg(short, long, env = "OAIPMH_SETS")]
    sets: Option<String>,

    /// Number of concurrent workers
    #[arg(short, long, env = "OAIPMH_THREADS")]
    threads: Option<usize>,

    /// Metadata prefix requested from the repository
    #[arg(long, env = "OAIPMH_METADATA_PREFIX")]
    metadata_prefix: Option<String>,

    /// Seconds between progress log lines, 0 disables them
    #[arg(long, env = "OAIPMH_LOG_INTERVAL")]
    log_interval: Option<u64>,
}

impl Cli {
    fn into_config(self) -> oaipmh_dl::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_json_file(path)?,
            None => Config::default(),
        };

        if let Some(verb) = self.verb {
            config.harvest.verb = verb;
        }
        if let Some(endpoint) = self.endpoint {
            config.harvest.endpoint = endpoint;
        }
        if let Some(output) = self.output {
            config.storage.output_dir = output;
        }
        if let Some(sets) = self.sets {
            config.harvest.sets = sets;
        }
        if let Some(threads) = self.threads {
            config.harvest.threads = threads;
        }
        if let Some(prefix) = self.metadata_prefix {
            config.harvest.metadata_prefix = prefix;
        }
        if let Some(secs) = self.log_interval {
            config.harvest.log_progress_interval = Duration::from_secs(secs);
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = match Cli::parse().into_config() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Could not load configuration");
            return ExitCode::FAILURE;
        }
    };

    if !config.notifications.mail_to.is_empty() {
        tracing::warn!(
            recipients = config.notifications.mail_to.len(),
            "Mail recipients configured but this binary has no mail transport, skipping mail reports"
        );
    }

    let harvester = match Harvester::new(config) {
        Ok(harvester) => harvester,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    match run_with_shutdown(&harvester).await {
        Ok(outcome) => {
            log_outcome(&outcome);
            ExitCode::SUCCESS
        }
        Err(e @ Error::Config { .. }) => {
            tracing::error!(error = %e, "Invalid configuration");
            ExitCode::FAILURE
        }
        Err(e) => {
            // run-level faults are reported, not escalated to the exit status
            tracing::error!(error = %e, "Run failed");
            ExitCode::SUCCESS
        }
    }
}

fn log_outcome(outcome: &VerbOutcome) {
    match outcome {
        VerbOutcome::Harvest { retries, run } => {
            for (pass, summary) in retries.iter().enumerate() {
                tracing::info!(
                    pass = pass + 1,
                    requested = summary.requested,
                    harvested = summary.harvested,
                    "Failed-set retry pass finished"
                );
            }
            match run {
                Some(summary) => tracing::info!(
                    kind = ?summary.kind,
                    requested = summary.requested,
                    harvested = summary.harvested,
                    failed = summary.failed_sets.len(),
                    interrupted = summary.interrupted,
                    elapsed_secs = summary.elapsed.as_secs(),
                    "Harvest finished"
                ),
                None => tracing::warn!("Harvest interrupted during a retry pass"),
            }
        }
        VerbOutcome::Catalog { sets } => {
            for set in sets {
                println!("{set}");
            }
            tracing::info!(sets = sets.len(), "Catalog listed");
        }
        VerbOutcome::Checksums { written } => {
            tracing::info!(written = written.len(), "Checksums generated");
        }
        VerbOutcome::Skipped { verb } => {
            tracing::warn!(verb = %verb, "Unrecognized verb, nothing to do");
        }
    }
}
