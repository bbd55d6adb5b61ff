//! One scheduled harvest run: fan-out, accounting, ledger and marker updates

use crate::classifier::{ClassifyContext, StatusClassifier};
use crate::harvester::{RetryingHarvester, SetOutcome};
use crate::scheduler::{ScheduleReport, Scheduler};
use crate::storage::ledger::FailureLedger;
use crate::storage::marker::write_marker;
use crate::types::{ArtifactStatus, RunKind, RunSummary, SetId};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Everything decided before a run starts
#[derive(Clone, Debug)]
pub struct RunPlan {
    /// How the run came about
    pub kind: RunKind,
    /// Sets to harvest, without duplicates
    pub requested: Vec<SetId>,
    /// De-published sets removed before the run
    pub deleted: Vec<SetId>,
    /// Sets that had artifacts before the run
    pub previously_held: BTreeSet<SetId>,
    /// Start of the previous unconstrained harvest
    pub last_harvest: Option<DateTime<Utc>>,
    /// Sets still outstanding from an earlier pass of this invocation
    pub carried_failures: BTreeSet<SetId>,
    /// Taken before the catalog was queried; becomes the next marker
    pub started_at: DateTime<Utc>,
}

impl RunPlan {
    /// Plan for `requested` with nothing deleted or carried over
    pub fn new(kind: RunKind, requested: Vec<SetId>) -> Self {
        Self {
            kind,
            requested: dedup(requested),
            deleted: Vec::new(),
            previously_held: BTreeSet::new(),
            last_harvest: None,
            carried_failures: BTreeSet::new(),
            started_at: Utc::now(),
        }
    }

    /// Same plan, started at `started_at`
    pub fn with_start(mut self, started_at: DateTime<Utc>) -> Self {
        self.started_at = started_at;
        self
    }
}

/// Collaborators a run needs
pub(crate) struct RunContext<'a> {
    pub root: &'a Path,
    pub scheduler: &'a Scheduler,
    pub worker: Arc<RetryingHarvester>,
    pub classifier: &'a dyn StatusClassifier,
    pub ledger: &'a FailureLedger,
}

/// Drop repeated ids, keeping the first occurrence
pub fn dedup(sets: Vec<SetId>) -> Vec<SetId> {
    let mut seen = BTreeSet::new();
    sets.into_iter()
        .filter(|set| seen.insert(set.clone()))
        .collect()
}

/// Harvest `plan.requested`, then settle the ledger and the marker
pub(crate) async fn execute(
    ctx: RunContext<'_>,
    plan: RunPlan,
    cancel: &CancellationToken,
) -> RunSummary {
    let started_at = plan.started_at;
    let clock = Instant::now();
    let is_selective = plan.kind.is_unconstrained();
    tracing::info!(
        kind = ?plan.kind,
        sets = plan.requested.len(),
        deleted = plan.deleted.len(),
        "Starting harvest run"
    );

    let report = ctx
        .scheduler
        .schedule(&plan.requested, is_selective, ctx.worker.clone(), cancel)
        .await;

    let mut summary = summarize(&plan, &report, started_at);
    summary.statuses = statuses(&plan, &report, ctx.classifier, started_at);

    let succeeded: BTreeSet<&SetId> = report.harvested().map(|r| &r.set).collect();
    if plan.kind == RunKind::Retry {
        summary.retry_summary = Some(reconciliation(&plan.requested, &succeeded));
    }

    let mut outstanding = summary.failed_sets.clone();
    for set in &plan.carried_failures {
        if !succeeded.contains(set) && !outstanding.contains(set) {
            outstanding.push(set.clone());
        }
    }
    if let Err(e) = ctx.ledger.write(&outstanding, started_at.date_naive()) {
        tracing::error!(error = %e, "Failed to write failed sets ledger");
    }

    if plan.kind.is_unconstrained() && !summary.interrupted {
        if let Err(e) = write_marker(ctx.root, started_at) {
            tracing::error!(error = %e, "Failed to update last harvest date");
        }
    }

    check_consistency(&summary);
    summary.elapsed = clock.elapsed();
    tracing::info!(
        kind = ?summary.kind,
        requested = summary.requested,
        harvested = summary.harvested,
        failed = summary.failed_sets.len(),
        interrupted = summary.interrupted,
        elapsed = %crate::utils::format_duration(summary.elapsed),
        "Harvest run finished"
    );
    summary
}

/// Counts and per-set maps from the scheduler's outcomes
pub(crate) fn summarize(
    plan: &RunPlan,
    report: &ScheduleReport,
    started_at: DateTime<Utc>,
) -> RunSummary {
    let mut summary = RunSummary::new(plan.kind, plan.requested.len(), started_at);
    summary.interrupted = report.interrupted;

    let mut succeeded = BTreeSet::new();
    for result in report.results() {
        let key = result.set.to_string();
        match &result.outcome {
            SetOutcome::Harvested(tally) => {
                summary.harvested += 1;
                succeeded.insert(result.set.clone());
                summary.record_counts.insert(key.clone(), tally.written);
                summary.failed_records.insert(key, tally.failed_records());
            }
            SetOutcome::Failed {
                tally: Some(tally), ..
            } => {
                summary.failed_records.insert(key, tally.failed_records());
            }
            SetOutcome::Failed { tally: None, .. } => {}
        }
    }

    summary.failed_sets = plan
        .requested
        .iter()
        .filter(|set| !succeeded.contains(*set))
        .cloned()
        .collect();
    summary
}

/// Artifact status of every set the run touched
///
/// Sets attempted are classified from their archives, deleted sets are
/// DELETED, and requested sets never recorded are NOT_AVAILABLE. Catalog
/// runs also classify local sets they left alone.
pub(crate) fn statuses(
    plan: &RunPlan,
    report: &ScheduleReport,
    classifier: &dyn StatusClassifier,
    started_at: DateTime<Utc>,
) -> std::collections::BTreeMap<String, ArtifactStatus> {
    let context = ClassifyContext {
        last_harvest: plan.last_harvest,
        run_start: started_at,
    };
    let mut statuses = std::collections::BTreeMap::new();

    let recorded: BTreeSet<&SetId> = report
        .results()
        .filter(|r| r.outcome.tally().is_some())
        .map(|r| &r.set)
        .collect();

    for set in &plan.requested {
        let status = if recorded.contains(set) {
            classifier.status(set, plan.previously_held.contains(set), &context)
        } else {
            ArtifactStatus::NotAvailable
        };
        statuses.insert(set.to_string(), status);
    }

    if plan.kind.is_unconstrained() {
        let requested: BTreeSet<&SetId> = plan.requested.iter().collect();
        for set in &plan.previously_held {
            if !requested.contains(set) {
                statuses.insert(set.to_string(), classifier.status(set, true, &context));
            }
        }
    }

    for set in &plan.deleted {
        statuses.insert(set.to_string(), ArtifactStatus::Deleted);
    }
    statuses
}

/// Before/after text of a retry pass
///
/// ```
/// use oaipmh_dl::orchestrator::run::reconciliation;
/// use oaipmh_dl::SetId;
/// use std::collections::BTreeSet;
///
/// let requested = vec![SetId::from("A"), SetId::from("B"), SetId::from("C")];
/// let a = SetId::from("A");
/// let b = SetId::from("B");
/// let succeeded: BTreeSet<&SetId> = [&a, &b].into_iter().collect();
/// assert_eq!(reconciliation(&requested, &succeeded), "[A, B]: SUCCESS\n[C]: FAILED");
/// ```
pub fn reconciliation(requested: &[SetId], succeeded: &BTreeSet<&SetId>) -> String {
    let (ok, failed): (Vec<&SetId>, Vec<&SetId>) =
        requested.iter().partition(|set| succeeded.contains(*set));
    let join = |sets: &[&SetId]| {
        sets.iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    };
    format!("[{}]: SUCCESS\n[{}]: FAILED", join(&ok), join(&failed))
}

/// `harvested + outstanding == requested`, logged when violated
///
/// `harvested` counts completed outcomes as the scheduler reported them while
/// `failed_sets` is derived from the request, so a set harvested twice or a
/// set nobody asked for breaks the equation.
pub fn check_consistency(summary: &RunSummary) -> bool {
    let consistent = summary.harvested + summary.failed_sets.len() == summary.requested;
    if !consistent {
        tracing::error!(
            requested = summary.requested,
            harvested = summary.harvested,
            failed = summary.failed_sets.len(),
            "Harvest bookkeeping mismatch"
        );
    }
    consistent
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::harvester::{HarvestTally, SetResult};
    use crate::scheduler::ShardReport;
    use std::time::Duration;

    /// Classifies by a fixed table, unknown sets NOT_AVAILABLE
    struct Fixed(Vec<(&'static str, ArtifactStatus)>);

    impl StatusClassifier for Fixed {
        fn status(&self, set: &SetId, _held: bool, _ctx: &ClassifyContext) -> ArtifactStatus {
            self.0
                .iter()
                .find(|(s, _)| *s == set.as_str())
                .map(|(_, status)| *status)
                .unwrap_or(ArtifactStatus::NotAvailable)
        }
    }

    fn ok(set: &str, expected: u64, written: u64) -> SetResult {
        SetResult {
            set: SetId::from(set),
            outcome: SetOutcome::Harvested(HarvestTally { expected, written }),
        }
    }

    fn failed(set: &str, tally: Option<HarvestTally>) -> SetResult {
        SetResult {
            set: SetId::from(set),
            outcome: SetOutcome::Failed {
                error: "boom".into(),
                transient: true,
                tally,
            },
        }
    }

    fn report(results: Vec<SetResult>) -> ScheduleReport {
        ScheduleReport {
            shards: vec![ShardReport {
                index: 0,
                results,
                errors: 0,
                aborted: false,
                elapsed: Duration::ZERO,
            }],
            interrupted: false,
        }
    }

    fn ids(v: &[&str]) -> Vec<SetId> {
        v.iter().map(|s| SetId::from(*s)).collect()
    }

    #[test]
    fn dedup_keeps_first_occurrence() {
        assert_eq!(dedup(ids(&["B", "A", "B", "C", "A"])), ids(&["B", "A", "C"]));
    }

    #[test]
    fn summary_counts_and_maps() {
        let plan = RunPlan::new(RunKind::Explicit, ids(&["A", "F", "X", "Y"]));
        let report = report(vec![
            ok("A", 10, 10),
            ok("F", 100, 97),
            failed("X", Some(HarvestTally { expected: 5, written: 2 })),
            // Y never attempted (shard aborted)
        ]);
        let summary = summarize(&plan, &report, Utc::now());

        assert_eq!(summary.requested, 4);
        assert_eq!(summary.harvested, 2);
        assert_eq!(summary.failed_sets, ids(&["X", "Y"]));
        assert_eq!(summary.record_counts.get("F"), Some(&97));
        assert_eq!(summary.failed_records.get("F"), Some(&3));
        assert_eq!(summary.failed_records.get("X"), Some(&3));
        assert!(!summary.record_counts.contains_key("X"));
        assert!(check_consistency(&summary));
    }

    #[test]
    fn unrecorded_sets_are_not_available_and_deleted_overrides() {
        let mut plan = RunPlan::new(RunKind::Selective, ids(&["C", "D", "Z"]));
        plan.deleted = ids(&["B"]);
        plan.previously_held = ids(&["A", "B", "C"]).into_iter().collect();
        let report = report(vec![ok("C", 1, 1), ok("D", 1, 1), failed("Z", None)]);
        let classifier = Fixed(vec![
            ("A", ArtifactStatus::Unchanged),
            ("B", ArtifactStatus::Changed),
            ("C", ArtifactStatus::Changed),
            ("D", ArtifactStatus::New),
        ]);

        let statuses = statuses(&plan, &report, &classifier, Utc::now());
        assert_eq!(statuses["A"], ArtifactStatus::Unchanged);
        assert_eq!(statuses["B"], ArtifactStatus::Deleted);
        assert_eq!(statuses["C"], ArtifactStatus::Changed);
        assert_eq!(statuses["D"], ArtifactStatus::New);
        assert_eq!(statuses["Z"], ArtifactStatus::NotAvailable);
    }

    #[test]
    fn explicit_runs_leave_other_local_sets_out() {
        let mut plan = RunPlan::new(RunKind::Explicit, ids(&["C"]));
        plan.previously_held = ids(&["A", "C"]).into_iter().collect();
        let report = report(vec![ok("C", 1, 1)]);
        let classifier = Fixed(vec![("A", ArtifactStatus::Unchanged), ("C", ArtifactStatus::Changed)]);

        let statuses = statuses(&plan, &report, &classifier, Utc::now());
        assert_eq!(statuses.len(), 1);
    }

    #[test]
    fn consistency_violation_is_detected() {
        let mut summary = RunSummary::new(RunKind::Full, 3, Utc::now());
        summary.harvested = 2;
        summary.failed_sets = ids(&["A", "B"]);
        assert!(!check_consistency(&summary));
    }

    #[test]
    fn duplicate_or_unrequested_outcomes_break_consistency() {
        let plan = RunPlan::new(RunKind::Full, ids(&["A", "B"]));

        let doubled = summarize(&plan, &report(vec![ok("A", 1, 1), ok("A", 1, 1)]), Utc::now());
        assert_eq!(doubled.harvested, 2);
        assert_eq!(doubled.failed_sets, ids(&["B"]));
        assert!(!check_consistency(&doubled));

        let foreign = summarize(&plan, &report(vec![ok("A", 1, 1), ok("Z", 1, 1)]), Utc::now());
        assert!(!check_consistency(&foreign));

        let both = summarize(
            &plan,
            &report(vec![ok("A", 1, 1), ok("A", 1, 1), ok("Z", 1, 1)]),
            Utc::now(),
        );
        assert_eq!(both.harvested, 3);
        assert!(!check_consistency(&both));

        let clean = summarize(&plan, &report(vec![ok("A", 1, 1), failed("B", None)]), Utc::now());
        assert!(check_consistency(&clean));
    }

    #[test]
    fn reconciliation_lists_both_groups() {
        let requested = ids(&["A", "B"]);
        let none = BTreeSet::new();
        assert_eq!(reconciliation(&requested, &none), "[]: SUCCESS\n[A, B]: FAILED");
    }
}
