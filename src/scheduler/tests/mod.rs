use super::*;
use crate::harvester::{HarvestTally, SetOutcome};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Mutex;

/// Fails the sets named in `failing`, records the processing order
#[derive(Default)]
struct FakeWorker {
    failing: HashSet<String>,
    order: Mutex<Vec<String>>,
    delay: Duration,
}

impl FakeWorker {
    fn failing(sets: &[&str]) -> Self {
        Self {
            failing: sets.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }
}

#[async_trait]
impl SetWorker for FakeWorker {
    async fn process(&self, set: &SetId) -> SetOutcome {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.order.lock().unwrap().push(set.to_string());
        if self.failing.contains(set.as_str()) {
            SetOutcome::Failed {
                error: "boom".into(),
                transient: false,
                tally: None,
            }
        } else {
            SetOutcome::Harvested(HarvestTally {
                expected: 1,
                written: 1,
            })
        }
    }
}

fn ids(n: usize) -> Vec<SetId> {
    (0..n).map(|i| SetId::from(format!("S{i}"))).collect()
}

// --- effective_concurrency() ---

#[test]
fn concurrency_is_at_least_one() {
    assert_eq!(effective_concurrency(10, 0, false), 1);
    assert_eq!(effective_concurrency(0, 0, true), 1);
}

#[test]
fn selective_runs_shrink_to_item_count() {
    assert_eq!(effective_concurrency(2, 8, true), 2);
    assert_eq!(effective_concurrency(0, 8, true), 1);
    assert_eq!(effective_concurrency(20, 8, true), 8);
}

#[test]
fn non_selective_runs_keep_configured_concurrency() {
    assert_eq!(effective_concurrency(2, 8, false), 8);
}

// --- shard_ranges() ---

#[test]
fn shards_cover_every_item_once() {
    for len in 0..40 {
        for shards in 1..9 {
            let ranges = shard_ranges(len, shards);
            assert_eq!(ranges.len(), shards);

            let mut covered = Vec::new();
            for r in &ranges {
                covered.extend(r.clone());
            }
            assert_eq!(covered, (0..len).collect::<Vec<_>>(), "len={len} shards={shards}");

            let base = len / shards;
            for r in &ranges[..shards - 1] {
                assert_eq!(r.len(), base);
            }
            assert_eq!(ranges[shards - 1].len(), base + len % shards);
        }
    }
}

#[test]
fn remainder_goes_to_last_shard() {
    assert_eq!(shard_ranges(10, 3), vec![0..3, 3..6, 6..10]);
}

// --- schedule() ---

#[tokio::test]
async fn every_item_yields_one_outcome_in_shard_order() {
    let items = ids(11);
    let worker = Arc::new(FakeWorker::default());
    let report = Scheduler::new(3, Duration::ZERO)
        .schedule(&items, false, worker.clone(), &CancellationToken::new())
        .await;

    assert_eq!(report.len(), 11);
    assert_eq!(report.shards.len(), 3);
    let collected: Vec<SetId> = report.results().map(|r| r.set.clone()).collect();
    assert_eq!(collected, items);
    assert!(!report.interrupted);
}

#[tokio::test]
async fn selective_run_with_one_set_uses_one_shard() {
    let items = ids(1);
    let report = Scheduler::new(4, Duration::ZERO)
        .schedule(&items, true, Arc::new(FakeWorker::default()), &CancellationToken::new())
        .await;
    assert_eq!(report.shards.len(), 1);
    assert_eq!(report.len(), 1);
}

#[tokio::test]
async fn failures_are_reported_not_raised() {
    let items = ids(4);
    let worker = Arc::new(FakeWorker::failing(&["S1", "S3"]));
    let report = Scheduler::new(2, Duration::ZERO)
        .schedule(&items, false, worker, &CancellationToken::new())
        .await;

    assert_eq!(report.len(), 4);
    let harvested: Vec<&str> = report.harvested().map(|r| r.set.as_str()).collect();
    assert_eq!(harvested, vec!["S0", "S2"]);
    assert_eq!(report.shards[0].errors, 1);
    assert_eq!(report.shards[1].errors, 1);
}

#[tokio::test]
async fn shard_aborts_after_error_budget_keeping_earlier_outcomes() {
    let items = ids(10);
    let failing: Vec<String> = (0..8).map(|i| format!("S{i}")).collect();
    let failing: Vec<&str> = failing.iter().map(String::as_str).collect();
    let report = Scheduler::new(1, Duration::ZERO)
        .schedule(
            &items,
            false,
            Arc::new(FakeWorker::failing(&failing)),
            &CancellationToken::new(),
        )
        .await;

    let shard = &report.shards[0];
    assert!(shard.aborted);
    assert_eq!(shard.errors, MAX_ERRORS_PER_WORKER + 1);
    assert_eq!(shard.results.len(), (MAX_ERRORS_PER_WORKER + 1) as usize);
}

#[tokio::test]
async fn aborted_shard_does_not_stop_other_shards() {
    let items = ids(20);
    // shard 0 (S0..S9) fails throughout, shard 1 is healthy
    let failing: Vec<String> = (0..10).map(|i| format!("S{i}")).collect();
    let failing: Vec<&str> = failing.iter().map(String::as_str).collect();
    let report = Scheduler::new(2, Duration::ZERO)
        .schedule(
            &items,
            false,
            Arc::new(FakeWorker::failing(&failing)),
            &CancellationToken::new(),
        )
        .await;

    assert!(report.shards[0].aborted);
    assert!(!report.shards[1].aborted);
    assert_eq!(report.shards[1].results.len(), 10);
}

#[tokio::test]
async fn cancellation_returns_partial_report() {
    let items = ids(50);
    let worker = Arc::new(FakeWorker {
        delay: Duration::from_millis(20),
        ..Default::default()
    });
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(70)).await;
        trigger.cancel();
    });

    let report = Scheduler::new(2, Duration::ZERO)
        .schedule(&items, false, worker, &cancel)
        .await;

    assert!(report.interrupted);
    assert!(report.len() < 50);
}

#[tokio::test]
async fn sets_within_a_shard_run_in_list_order() {
    let items = ids(6);
    let worker = Arc::new(FakeWorker::default());
    Scheduler::new(1, Duration::ZERO)
        .schedule(&items, false, worker.clone(), &CancellationToken::new())
        .await;

    let order = worker.order.lock().unwrap().clone();
    let expected: Vec<String> = items.iter().map(|s| s.to_string()).collect();
    assert_eq!(order, expected);
}
