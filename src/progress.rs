//! Time-throttled progress logging
//!
//! [`ProgressLogger`] is owned by whoever does the counting (one per set
//! harvest). [`spawn_progress_reporter`] is the set-level reporter owned by the
//! scheduler; workers only bump a shared counter.

use crate::utils::format_duration;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Logs "retrieved n of total" lines at most once per interval
#[derive(Debug)]
pub struct ProgressLogger {
    label: String,
    total: Option<u64>,
    interval: Duration,
    started: Instant,
    last_log: Instant,
}

impl ProgressLogger {
    /// Create a logger; `interval` of zero disables output
    pub fn new(label: impl Into<String>, total: Option<u64>, interval: Duration) -> Self {
        let now = Instant::now();
        let label = label.into();
        tracing::debug!(label = %label, ?total, "Created progress logger");
        Self {
            label,
            total,
            interval,
            started: now,
            last_log: now,
        }
    }

    /// Update the expected total
    pub fn set_total(&mut self, total: Option<u64>) {
        self.total = total;
    }

    /// Log progress if the interval elapsed since the previous line
    ///
    /// Returns true when a line was written.
    pub fn log_progress(&mut self, done: u64) -> bool {
        if self.interval.is_zero() || self.last_log.elapsed() < self.interval {
            return false;
        }
        tracing::info!("{}", self.message(done));
        self.last_log = Instant::now();
        true
    }

    /// Progress line for `done` items
    pub fn message(&self, done: u64) -> String {
        let Some(total) = self.total.filter(|t| *t > 0) else {
            return format!("{} - Retrieved {} items", self.label, done);
        };
        let elapsed = self.started.elapsed().as_secs_f64();
        if done == 0 || elapsed <= 0.0 {
            return format!("{} - Retrieved {} items of {}", self.label, done, total);
        }
        let per_sec = done as f64 / elapsed;
        let remaining = Duration::from_secs_f64(total.saturating_sub(done) as f64 / per_sec);
        let rate = if per_sec > 1.5 {
            format!("{} records/sec", per_sec.round() as u64)
        } else {
            format!("{} records/min", (per_sec * 60.0).round() as u64)
        };
        format!(
            "{} - Retrieved {} items of {} ({}). Time remaining is {}",
            self.label,
            done,
            total,
            rate,
            format_duration(remaining)
        )
    }
}

/// Parameters for [`spawn_progress_reporter`]
pub struct ProgressReporterParams {
    /// Label of the reported scope
    pub label: String,
    /// Number of items expected
    pub total: u64,
    /// Shared counter of completed items
    pub done: Arc<AtomicU64>,
    /// Time between log lines
    pub interval: Duration,
    /// Stops the reporter
    pub cancel_token: tokio_util::sync::CancellationToken,
}

/// Spawn a background task that logs the shared counter every `interval`
///
/// Returns `None` when the interval is zero (progress logging disabled).
pub fn spawn_progress_reporter(
    params: ProgressReporterParams,
) -> Option<tokio::task::JoinHandle<()>> {
    let ProgressReporterParams {
        label,
        total,
        done,
        interval,
        cancel_token,
    } = params;
    if interval.is_zero() {
        return None;
    }
    Some(tokio::spawn(async move {
        let logger = ProgressLogger::new(label, Some(total), interval);
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    tracing::info!("{}", logger.message(done.load(Ordering::Relaxed)));
                }
                _ = cancel_token.cancelled() => {
                    break;
                }
            }
        }
    }))
}
