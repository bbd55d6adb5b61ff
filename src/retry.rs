//! Fixed-delay retries for transient repository faults
//!
//! A set harvest (or a catalog listing) is re-run from the start when it
//! fails with a fault the repository may recover from: timeouts, refused
//! connections, 5xx answers. Malformed responses, protocol errors and local
//! disk trouble fail on the first attempt.
//!
//! ```no_run
//! use oaipmh_dl::config::RetryConfig;
//! use oaipmh_dl::retry::with_retry;
//!
//! # async fn example() -> oaipmh_dl::Result<()> {
//! let config = RetryConfig::default();
//! let sets = with_retry(&config, "catalog", || async {
//!     Ok::<_, oaipmh_dl::Error>(vec!["2021672"])
//! })
//! .await?;
//! assert_eq!(sets.len(), 1);
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::Error;
use rand::Rng;
use std::future::Future;
use std::io::ErrorKind;
use std::time::Duration;

/// Whether a failed attempt is worth repeating
pub trait IsRetryable {
    /// True for faults a later attempt may not hit
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Network(e) => e.is_timeout() || e.is_connect() || e.is_request() || e.is_body(),
            Error::Server { status, .. } => *status >= 500,
            Error::Io(e) => matches!(
                e.kind(),
                ErrorKind::TimedOut
                    | ErrorKind::ConnectionRefused
                    | ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}

/// Run `operation` until it succeeds, fails permanently, or the retry budget is spent
///
/// At most `config.max_retries + 1` attempts are made, `config.delay` apart.
/// `label` names the unit of work in log lines (a set id or "catalog").
pub async fn with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    label: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let attempts = config.max_retries.saturating_add(1);
    let mut attempt = 1;
    loop {
        let error = match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(set = label, attempt, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        if !error.is_retryable() {
            tracing::error!(set = label, error = %error, "Failed with a permanent error");
            return Err(error);
        }
        if attempt >= attempts {
            tracing::error!(set = label, error = %error, attempts, "Giving up after retries");
            return Err(error);
        }

        let pause = pause(config);
        tracing::warn!(
            set = label,
            error = %error,
            attempt,
            of = attempts,
            pause_ms = pause.as_millis(),
            "Transient failure, retrying"
        );
        tokio::time::sleep(pause).await;
        attempt += 1;
    }
}

/// Delay before the next attempt; jitter stretches it up to twice as long
fn pause(config: &RetryConfig) -> Duration {
    if config.jitter {
        config.delay.mul_f64(1.0 + rand::thread_rng().gen_range(0.0..=1.0))
    } else {
        config.delay
    }
}
