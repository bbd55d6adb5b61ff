//! Work scheduler: static sharding of sets across a bounded set of workers
//!
//! Sets are split by count into contiguous shards, one tokio task per shard.
//! A shard processes its sets strictly in order and gives up on the rest once
//! its own error budget is spent. Results are collected in shard order, not
//! completion order.
//!
//! Set-level progress is logged by a single reporter task fed through an
//! atomic counter; workers never log progress themselves.

use crate::harvester::{SetResult, SetWorker};
use crate::progress::{ProgressReporterParams, spawn_progress_reporter};
use crate::types::SetId;
use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Failures a shard tolerates before abandoning its remaining sets
pub const MAX_ERRORS_PER_WORKER: u32 = 5;

/// Number of shards to run for `items` sets
///
/// Never below one. Selective runs with fewer sets than `concurrency` use one
/// shard per set instead of idle workers.
pub fn effective_concurrency(items: usize, concurrency: usize, is_selective: bool) -> usize {
    let concurrency = concurrency.max(1);
    if is_selective && items < concurrency {
        items.max(1)
    } else {
        concurrency
    }
}

/// Contiguous index ranges of `shards` shards over `len` items
///
/// Every shard gets `len / shards` items; the last one also takes the
/// remainder.
pub fn shard_ranges(len: usize, shards: usize) -> Vec<Range<usize>> {
    let shards = shards.max(1);
    let size = len / shards;
    (0..shards)
        .map(|i| {
            let start = i * size;
            let end = if i + 1 == shards { len } else { start + size };
            start..end
        })
        .collect()
}

/// What one shard produced
#[derive(Clone, Debug)]
pub struct ShardReport {
    /// Shard position
    pub index: usize,
    /// Outcomes in processing order
    pub results: Vec<SetResult>,
    /// Failed sets counted against the error budget
    pub errors: u32,
    /// True when the error budget was exceeded
    pub aborted: bool,
    /// Wall-clock time the shard ran
    pub elapsed: Duration,
}

impl ShardReport {
    fn empty(index: usize) -> Self {
        Self {
            index,
            results: Vec::new(),
            errors: 0,
            aborted: false,
            elapsed: Duration::ZERO,
        }
    }
}

/// All shards of one scheduled run
#[derive(Clone, Debug, Default)]
pub struct ScheduleReport {
    /// Shard reports in shard order
    pub shards: Vec<ShardReport>,
    /// True when cancellation stopped the run early
    pub interrupted: bool,
}

impl ScheduleReport {
    /// All outcomes, shard by shard
    pub fn results(&self) -> impl Iterator<Item = &SetResult> {
        self.shards.iter().flat_map(|s| s.results.iter())
    }

    /// Sets whose harvest completed
    pub fn harvested(&self) -> impl Iterator<Item = &SetResult> {
        self.results().filter(|r| !r.outcome.is_failure())
    }

    /// Number of outcomes
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.results.len()).sum()
    }

    /// True when no set was processed
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Runs one worker per shard and joins them
#[derive(Clone, Debug)]
pub struct Scheduler {
    concurrency: usize,
    log_interval: Duration,
}

impl Scheduler {
    /// Scheduler with at most `concurrency` workers
    pub fn new(concurrency: usize, log_interval: Duration) -> Self {
        Self {
            concurrency,
            log_interval,
        }
    }

    /// Process `items` with `worker`, blocking until every shard is done
    ///
    /// Cancelling `cancel` stops each shard before its next set (or in the
    /// middle of one); outcomes produced so far are still returned.
    pub async fn schedule(
        &self,
        items: &[SetId],
        is_selective: bool,
        worker: Arc<dyn SetWorker>,
        cancel: &CancellationToken,
    ) -> ScheduleReport {
        let shards = effective_concurrency(items.len(), self.concurrency, is_selective);
        let ranges = shard_ranges(items.len(), shards);
        tracing::info!(
            sets = items.len(),
            workers = shards,
            selective = is_selective,
            "Scheduling harvest"
        );

        let done = Arc::new(AtomicU64::new(0));
        let reporter_token = cancel.child_token();
        let reporter = spawn_progress_reporter(ProgressReporterParams {
            label: "Harvest".to_string(),
            total: items.len() as u64,
            done: done.clone(),
            interval: self.log_interval,
            cancel_token: reporter_token.clone(),
        });

        let handles: Vec<_> = ranges
            .into_iter()
            .enumerate()
            .map(|(index, range)| {
                let sets = items[range].to_vec();
                let worker = worker.clone();
                let done = done.clone();
                let cancel = cancel.clone();
                tokio::spawn(run_shard(index, sets, worker, done, cancel))
            })
            .collect();

        // join_all keeps submission order
        let mut report = ScheduleReport::default();
        let joined = futures::future::join_all(handles).await;
        for (index, joined) in joined.into_iter().enumerate() {
            match joined {
                Ok(shard) => report.shards.push(shard),
                Err(e) => {
                    tracing::error!(shard = index, error = %e, "Shard task failed");
                    report.shards.push(ShardReport::empty(index));
                }
            }
        }

        reporter_token.cancel();
        if let Some(reporter) = reporter {
            reporter.await.ok();
        }

        report.interrupted = cancel.is_cancelled();
        tracing::info!(
            processed = report.len(),
            harvested = report.harvested().count(),
            interrupted = report.interrupted,
            "Scheduled harvest finished"
        );
        report
    }
}

async fn run_shard(
    index: usize,
    sets: Vec<SetId>,
    worker: Arc<dyn SetWorker>,
    done: Arc<AtomicU64>,
    cancel: CancellationToken,
) -> ShardReport {
    let start = Instant::now();
    let mut report = ShardReport::empty(index);

    for set in sets {
        if cancel.is_cancelled() {
            break;
        }
        let outcome = tokio::select! {
            outcome = worker.process(&set) => outcome,
            _ = cancel.cancelled() => {
                tracing::warn!(shard = index, set = %set, "Harvest interrupted");
                break;
            }
        };
        done.fetch_add(1, Ordering::Relaxed);

        let failed = outcome.is_failure();
        report.results.push(SetResult { set, outcome });
        if failed {
            report.errors += 1;
            if report.errors > MAX_ERRORS_PER_WORKER {
                tracing::error!(
                    shard = index,
                    errors = report.errors,
                    "Too many failed sets, abandoning the rest of this shard"
                );
                report.aborted = true;
                break;
            }
        }
    }

    report.elapsed = start.elapsed();
    tracing::debug!(
        shard = index,
        processed = report.results.len(),
        errors = report.errors,
        elapsed_ms = report.elapsed.as_millis(),
        "Shard finished"
    );
    report
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
