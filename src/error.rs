//! Error types for oaipmh-dl
//!
//! One error enum covers the whole crate. Per-set faults are caught by the
//! harvester and turned into outcome data; only configuration problems are
//! expected to reach the process entry point.

use thiserror::Error;

/// Result type alias for oaipmh-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for oaipmh-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "harvest.endpoint")
        key: Option<String>,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error raised by the HTTP client
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The repository answered with a non-success HTTP status
    #[error("server returned HTTP {status} for {url}")]
    Server {
        /// HTTP status code
        status: u16,
        /// Request URL
        url: String,
    },

    /// The repository answered with an OAI-PMH `<error>` element
    #[error("OAI-PMH error {code}: {message}")]
    Protocol {
        /// Protocol error code (e.g. `badResumptionToken`)
        code: String,
        /// Error text supplied by the repository
        message: String,
    },

    /// Malformed or unexpected response body
    #[error("parse error: {0}")]
    Parse(String),

    /// Archive container error
    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The run was cancelled before it finished
    #[error("harvest interrupted")]
    Interrupted,

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for a [`Error::Config`] naming the offending key
    pub fn config(message: impl Into<String>, key: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }
}

impl From<quick_xml::Error> for Error {
    fn from(e: quick_xml::Error) -> Self {
        Error::Parse(e.to_string())
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        if e.is_cancelled() {
            Error::Interrupted
        } else {
            Error::Other(format!("task failed: {e}"))
        }
    }
}
