//! Configuration types for oaipmh-dl

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, path::PathBuf, time::Duration};

/// What to harvest and how hard to push the repository
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HarvestConfig {
    /// Verb to execute (`ListRecords`, `ListIdentifiers`, `ListSets`, `CheckSum`)
    #[serde(default = "default_verb")]
    pub verb: String,

    /// Base URL of the OAI-PMH endpoint
    #[serde(default)]
    pub endpoint: String,

    /// Metadata prefix requested from the repository (default: "oai_dc")
    #[serde(default = "default_metadata_prefix")]
    pub metadata_prefix: String,

    /// Set selection: comma-separated ids, the literal `ALL`, or empty for an
    /// incremental run
    #[serde(default)]
    pub sets: String,

    /// Optional `from` date (`YYYY-MM-DD` or `YYYY-MM-DDThh:mm:ssZ`) passed to
    /// the initial listing of an explicit set
    #[serde(default)]
    pub from: Option<String>,

    /// Number of concurrent workers (default: 4)
    #[serde(default = "default_threads")]
    pub threads: usize,

    /// Seconds between progress log lines, 0 disables progress logging (default: 30)
    #[serde(default = "default_log_interval", with = "duration_serde")]
    pub log_progress_interval: Duration,

    /// Output representations; every set is written once per format
    #[serde(default = "default_formats")]
    pub formats: Vec<OutputFormat>,

    /// Retry passes over the failure ledger before the regular run (default: 1)
    #[serde(default = "default_failed_set_passes")]
    pub failed_set_passes: u32,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            verb: default_verb(),
            endpoint: String::new(),
            metadata_prefix: default_metadata_prefix(),
            sets: String::new(),
            from: None,
            threads: default_threads(),
            log_progress_interval: default_log_interval(),
            formats: default_formats(),
            failed_set_passes: default_failed_set_passes(),
        }
    }
}

/// One output representation of a harvested set
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputFormat {
    /// Folder name under the output root (e.g. "XML")
    pub name: String,
    /// Extension of every archive entry, including the dot (e.g. ".xml")
    pub extension: String,
}

impl OutputFormat {
    /// Create a format with the given folder name and entry extension
    pub fn new(name: impl Into<String>, extension: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            extension: extension.into(),
        }
    }

    /// The default XML representation
    pub fn xml() -> Self {
        Self::new("XML", ".xml")
    }
}

/// On-disk locations
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root folder holding format folders, the marker and the ledger (default: "./sets")
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Alternative root the `CheckSum` verb reads archives from
    ///
    /// When unset, archives are read from `output_dir`.
    #[serde(default)]
    pub zips_dir: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            zips_dir: None,
        }
    }
}

/// Retry configuration for transient failures
///
/// Delays are fixed: every retry waits `delay` (plus optional jitter).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Number of retries after the initial attempt (default: 2)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before each retry (default: 2 seconds)
    #[serde(default = "default_retry_delay", with = "duration_serde")]
    pub delay: Duration,

    /// Add random jitter to delays (default: false)
    #[serde(default)]
    pub jitter: bool,

    /// Timeout of a single HTTP request (default: 300 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            delay: default_retry_delay(),
            jitter: false,
            request_timeout: default_request_timeout(),
        }
    }
}

/// Outbound run reports
///
/// Every channel is optional; leaving it unset disables that channel.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Recipients of the run summary mail
    #[serde(default)]
    pub mail_to: Vec<String>,

    /// Sender address of the run summary mail
    #[serde(default)]
    pub mail_from: Option<String>,

    /// Slack incoming-webhook URL
    #[serde(default)]
    pub slack_webhook: Option<String>,

    /// Public URL under which the output root is served, used for report links
    #[serde(default)]
    pub download_server_url: Option<String>,

    /// Also write the per-set status CSV under the output root (default: true)
    #[serde(default = "default_true")]
    pub status_csv: bool,

    /// Timeout for webhook delivery (default: 30 seconds)
    #[serde(default = "default_webhook_timeout", with = "duration_serde")]
    pub timeout: Duration,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            mail_to: Vec::new(),
            mail_from: None,
            slack_webhook: None,
            download_server_url: None,
            status_csv: default_true(),
            timeout: default_webhook_timeout(),
        }
    }
}

/// Main configuration for the harvester
///
/// Fields are organized into sub-configs:
/// - [`harvest`](HarvestConfig) — endpoint, verb, set selection, concurrency
/// - [`storage`](StorageConfig) — output locations
/// - [`retry`](RetryConfig) — transient-fault handling
/// - [`notifications`](NotificationConfig) — mail, Slack and CSV reports
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Harvest behavior settings
    #[serde(default)]
    pub harvest: HarvestConfig,

    /// Output locations
    #[serde(default)]
    pub storage: StorageConfig,

    /// Retry settings
    #[serde(default)]
    pub retry: RetryConfig,

    /// Notification settings
    #[serde(default)]
    pub notifications: NotificationConfig,
}

impl Config {
    /// Output root directory
    pub fn output_dir(&self) -> &PathBuf {
        &self.storage.output_dir
    }

    /// Load a JSON configuration file
    pub fn from_json_file(path: &std::path::Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Check settings that would make any run meaningless
    ///
    /// The endpoint is only required by verbs that talk to the repository,
    /// so it is checked by [`Config::require_endpoint`] instead.
    pub fn validate(&self) -> Result<()> {
        if self.storage.output_dir.as_os_str().is_empty() {
            return Err(Error::config(
                "output directory must not be empty",
                "storage.output_dir",
            ));
        }
        if self.harvest.formats.is_empty() {
            return Err(Error::config(
                "at least one output format is required",
                "harvest.formats",
            ));
        }
        let mut seen = HashSet::new();
        for format in &self.harvest.formats {
            if format.name.trim().is_empty() {
                return Err(Error::config(
                    "output format name must not be empty",
                    "harvest.formats",
                ));
            }
            if !seen.insert(format.name.as_str()) {
                return Err(Error::config(
                    format!("duplicate output format '{}'", format.name),
                    "harvest.formats",
                ));
            }
        }
        if self.harvest.metadata_prefix.trim().is_empty() {
            return Err(Error::config(
                "metadata prefix must not be empty",
                "harvest.metadata_prefix",
            ));
        }
        Ok(())
    }

    /// Fail unless an endpoint URL is configured and parses
    pub fn require_endpoint(&self) -> Result<url::Url> {
        if self.harvest.endpoint.trim().is_empty() {
            return Err(Error::config(
                "endpoint must be set for this verb",
                "harvest.endpoint",
            ));
        }
        url::Url::parse(self.harvest.endpoint.trim()).map_err(|e| {
            Error::config(format!("invalid endpoint URL: {e}"), "harvest.endpoint")
        })
    }
}

fn default_verb() -> String {
    "ListRecords".to_string()
}

fn default_metadata_prefix() -> String {
    "oai_dc".to_string()
}

fn default_threads() -> usize {
    4
}

fn default_log_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_formats() -> Vec<OutputFormat> {
    vec![OutputFormat::xml()]
}

fn default_failed_set_passes() -> u32 {
    1
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./sets")
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_webhook_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_true() -> bool {
    true
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
