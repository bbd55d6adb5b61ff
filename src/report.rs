//! Run reports: text rendering and outbound notifiers
//!
//! Every notifier receives the finished [`RunSummary`]. Delivery problems are
//! logged by the caller and never fail a run.

use crate::config::NotificationConfig;
use crate::error::{Error, Result};
use crate::types::{ArtifactStatus, RunKind, RunSummary};
use crate::utils::format_duration;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Subject prefix of a regular run report
pub const DOWNLOADS_SUBJECT: &str = "Downloads Run Status Report for ";

/// Subject prefix of a failed-sets retry report
pub const RETRY_SUBJECT: &str = "Failed Sets Retry Status Report for ";

/// File name prefix of the per-set status CSV
pub const STATUS_REPORT_PREFIX: &str = "DownloadStatus_";

/// Header row of the per-set status CSV
pub const STATUS_REPORT_HEADER: &str = "DatasetId,FileStatus,TotalRecords,FailedRecords";

/// Per-set rows included in a Slack message
pub const MAX_SLACK_ROWS: usize = 50;

const TABLE_CELL: usize = 25;

/// One row of the per-set status table
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusRow {
    /// Set id
    pub set: String,
    /// Artifact status
    pub status: ArtifactStatus,
    /// Records written
    pub total_records: u64,
    /// Records announced but not written
    pub failed_records: u64,
}

impl RunSummary {
    /// Mail and chat subject, dated by the run start
    pub fn subject(&self) -> String {
        let prefix = if self.kind == RunKind::Retry {
            RETRY_SUBJECT
        } else {
            DOWNLOADS_SUBJECT
        };
        format!("{prefix}{}", self.started_at.format("%Y-%m-%d"))
    }

    /// Rows of the status table, ordered by set id
    pub fn rows(&self) -> Vec<StatusRow> {
        self.statuses
            .iter()
            .map(|(set, status)| StatusRow {
                set: set.clone(),
                status: *status,
                total_records: self.record_counts.get(set).copied().unwrap_or(0),
                failed_records: self.failed_records.get(set).copied().unwrap_or(0),
            })
            .collect()
    }

    /// Fixed-width text table of every set's status
    pub fn render_table(&self) -> String {
        let mut table = format!(
            "{:<TABLE_CELL$}{:<TABLE_CELL$}{:<TABLE_CELL$}{}\n",
            "Dataset", "Status", "Total Records", "Failed Records"
        );
        for row in self.rows() {
            table.push_str(&format!(
                "{:<TABLE_CELL$}{:<TABLE_CELL$}{:<TABLE_CELL$}{}\n",
                row.set,
                row.status.as_str(),
                row.total_records,
                row.failed_records
            ));
        }
        table
    }

    /// Plain-text mail body
    ///
    /// Retry passes list the reconciliation instead of the harvested count.
    pub fn render_email_body(&self) -> String {
        let harvested = match (&self.kind, &self.retry_summary) {
            (RunKind::Retry, Some(reconciliation)) => reconciliation.clone(),
            _ => self.harvested.to_string(),
        };
        let mut body = format!(
            "Downloads Status Report :\n\n\
             Number of datasets: {}\n\n\
             Start Time:  {}\n\n\
             Elapsed Time: {}\n\n\
             Datasets Harvested: {}\n\n",
            self.requested,
            self.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
            format_duration(self.elapsed),
            harvested,
        );
        if self.interrupted {
            body.push_str("The run was interrupted before all sets were processed.\n\n");
        }
        body.push_str(&self.render_table());
        body
    }
}

/// Receives finished run summaries
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Channel name used in logs
    fn name(&self) -> &'static str;

    /// Deliver `summary`
    async fn notify(&self, summary: &RunSummary) -> Result<()>;
}

/// Status report CSV file name for a run on `date`
pub fn status_report_name(date: DateTime<Utc>) -> String {
    format!("{STATUS_REPORT_PREFIX}{}.csv", date.format("%Y_%m_%d"))
}

/// CSV content of the per-set status table
pub fn render_status_csv(summary: &RunSummary) -> String {
    let mut csv = String::from(STATUS_REPORT_HEADER);
    csv.push('\n');
    for row in summary.rows() {
        csv.push_str(&format!(
            "{},{},{},{}\n",
            row.set, row.status, row.total_records, row.failed_records
        ));
    }
    csv
}

/// Writes `DownloadStatus_<yyyy_MM_dd>.csv` under the output root
#[derive(Clone, Debug)]
pub struct CsvReportWriter {
    root: PathBuf,
}

impl CsvReportWriter {
    /// Writer for reports under `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Path the report of `summary` is written to
    pub fn report_path(&self, summary: &RunSummary) -> PathBuf {
        self.root.join(status_report_name(summary.started_at))
    }
}

#[async_trait]
impl Notifier for CsvReportWriter {
    fn name(&self) -> &'static str {
        "csv"
    }

    async fn notify(&self, summary: &RunSummary) -> Result<()> {
        let path = self.report_path(summary);
        tokio::fs::create_dir_all(&self.root).await?;
        tokio::fs::write(&path, render_status_csv(summary)).await?;
        tracing::info!(report = %path.display(), "Status report written");
        Ok(())
    }
}

/// Posts the run summary to a Slack incoming webhook
#[derive(Clone, Debug)]
pub struct SlackNotifier {
    client: reqwest::Client,
    webhook: String,
    download_server_url: Option<String>,
    timeout: Duration,
}

impl SlackNotifier {
    /// Notifier posting to `webhook`
    pub fn new(webhook: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            webhook: webhook.into(),
            download_server_url: None,
            timeout,
        }
    }

    /// Link reports under this public URL
    pub fn with_download_server_url(mut self, url: Option<String>) -> Self {
        self.download_server_url = url;
        self
    }

    /// Slack block payload for `summary`
    pub fn payload(&self, summary: &RunSummary) -> serde_json::Value {
        let section = |text: String| {
            serde_json::json!({
                "type": "section",
                "text": { "type": "mrkdwn", "text": text }
            })
        };

        let mut blocks = vec![
            serde_json::json!({
                "type": "header",
                "text": { "type": "plain_text", "emoji": true, "text": format!(":pencil: {}", summary.subject()) }
            }),
            section(format!("{} datasets were processed", summary.requested)),
            section(format!(
                "Status Overview: \n new: {}, changed: {}, unchanged: {}, reharvested: {}, deleted: {}",
                summary.count(ArtifactStatus::New),
                summary.count(ArtifactStatus::Changed),
                summary.count(ArtifactStatus::Unchanged),
                summary.count(ArtifactStatus::Reharvested),
                summary.count(ArtifactStatus::Deleted),
            )),
        ];
        if let Some(base) = &self.download_server_url {
            let link = format!(
                "{}/{}",
                base.trim_end_matches('/'),
                status_report_name(summary.started_at)
            );
            blocks.push(section(format!("Full report <{link}|here>")));
        }

        let rows = summary.rows();
        if !rows.is_empty() {
            blocks.push(section(
                "*Dataset                  Status           Total Records    Failed Records*"
                    .to_string(),
            ));
            for row in rows.iter().take(MAX_SLACK_ROWS) {
                blocks.push(section(format!(
                    "``` {:<TABLE_CELL$} {:<TABLE_CELL$}  {:<TABLE_CELL$} {:<TABLE_CELL$} ```",
                    row.set,
                    row.status.as_str(),
                    row.total_records,
                    row.failed_records
                )));
            }
        }
        blocks.push(serde_json::json!({ "type": "divider" }));

        serde_json::json!({ "blocks": blocks })
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    fn name(&self) -> &'static str {
        "slack"
    }

    async fn notify(&self, summary: &RunSummary) -> Result<()> {
        let response = self
            .client
            .post(&self.webhook)
            .json(&self.payload(summary))
            .timeout(self.timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, body = %body, "Slack webhook rejected the report");
            return Err(Error::Server {
                status: status.as_u16(),
                url: self.webhook.clone(),
            });
        }
        tracing::debug!("Slack report sent");
        Ok(())
    }
}

/// A rendered report mail
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MailMessage {
    /// Sender address
    pub from: String,
    /// Recipients
    pub to: Vec<String>,
    /// Subject line
    pub subject: String,
    /// Plain-text body
    pub body: String,
}

/// Delivers mails; supplied by the embedding application
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Send one message
    async fn send(&self, message: &MailMessage) -> Result<()>;
}

/// Renders the run summary as a mail and hands it to a [`MailTransport`]
#[derive(Clone)]
pub struct MailNotifier {
    transport: Arc<dyn MailTransport>,
    from: String,
    to: Vec<String>,
}

impl MailNotifier {
    /// Notifier sending from `from` to `to`
    pub fn new(transport: Arc<dyn MailTransport>, from: impl Into<String>, to: Vec<String>) -> Self {
        Self {
            transport,
            from: from.into(),
            to,
        }
    }

    /// Build from configuration; `None` when no recipient is configured
    pub fn from_config(
        config: &NotificationConfig,
        transport: Arc<dyn MailTransport>,
    ) -> Option<Self> {
        if config.mail_to.is_empty() {
            return None;
        }
        let from = config.mail_from.clone().unwrap_or_default();
        Some(Self::new(transport, from, config.mail_to.clone()))
    }

    /// Mail for `summary`
    pub fn message(&self, summary: &RunSummary) -> MailMessage {
        MailMessage {
            from: self.from.clone(),
            to: self.to.clone(),
            subject: summary.subject(),
            body: summary.render_email_body(),
        }
    }
}

#[async_trait]
impl Notifier for MailNotifier {
    fn name(&self) -> &'static str {
        "mail"
    }

    async fn notify(&self, summary: &RunSummary) -> Result<()> {
        self.transport.send(&self.message(summary)).await
    }
}
