use crate::error::{VaultError, WarnCode};
use crate::vault::archiver::{Archiver, Probe, StepResult};
use crate::vault::ledger::{IdempotencyLog, Outcome};
use crate::vault::path_key::PathKey;
use crate::vault::retention::{Decision, RetentionPolicy, SkipReason, partition_date};
use crate::vault::run_config::RunConfig;
use crate::vault::s3tar::ArchiveTool;
use crate::vault::storage::{ObjectStorage, child_prefix, partition_value};
use crate::vault::warn::{self, WarnEvent};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub company: String,
    pub dry_run: bool,
    pub archived: usize,
    pub ignored_rule_1: usize,
    pub ignored_retention: usize,
    pub empty: usize,
    pub failed: usize,
    pub already_resolved: usize,
    pub aggregates_written: usize,
    pub deleted: usize,
    pub delete_failures: usize,
    pub ledger_write_errors: usize,
    pub listing_errors: usize,
    pub invalid_partitions: usize,
    /// Eligible days left for a later run by the leaf limit.
    pub deferred: usize,
    pub failures: Vec<String>,
}

impl RunSummary {
    pub fn has_failures(&self) -> bool {
        self.failed > 0 || self.ledger_write_errors > 0 || self.listing_errors > 0
    }

    pub fn skipped(&self) -> usize {
        self.ignored_rule_1 + self.ignored_retention + self.already_resolved
    }

    fn record(&mut self, key: &PathKey, result: &LeafResult) {
        match result {
            LeafResult::AlreadyResolved(_) => self.already_resolved += 1,
            LeafResult::Ignored(SkipReason::Rule1) => self.ignored_rule_1 += 1,
            LeafResult::Ignored(SkipReason::Retention) => self.ignored_retention += 1,
            LeafResult::Empty => self.empty += 1,
            LeafResult::Archived { delete } => {
                self.archived += 1;
                match delete {
                    StepResult::Success => self.deleted += 1,
                    StepResult::Failed(_) => self.delete_failures += 1,
                    StepResult::Skipped(_) => {}
                }
            }
            LeafResult::Failed(reason) => {
                self.failed += 1;
                self.failures.push(format!("{key}: {reason}"));
            }
            LeafResult::Unrecorded { outcome, reason } => {
                self.ledger_write_errors += 1;
                self.failures
                    .push(format!("{key} ({} unrecorded): {reason}", outcome.label()));
            }
        }
    }

    fn listing_failed(&mut self, err: &VaultError) {
        self.listing_errors += 1;
        self.failures.push(err.to_string());
    }
}

/// What happened to one day partition in this run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeafResult {
    /// Resolved by an earlier run; carries that run's outcome when the day itself was recorded.
    AlreadyResolved(Option<Outcome>),
    Ignored(SkipReason),
    Empty,
    Archived { delete: StepResult },
    /// Archive or probe failure; left out of the ledger so the next run retries it.
    Failed(String),
    /// The decision was made but the ledger append failed.
    Unrecorded { outcome: Outcome, reason: String },
}

impl LeafResult {
    fn is_progress(&self, empty_counts: bool) -> bool {
        match self {
            Self::Archived { .. } => true,
            Self::Empty => empty_counts,
            Self::AlreadyResolved(Some(Outcome::Done)) => true,
            Self::AlreadyResolved(Some(Outcome::Empty)) => empty_counts,
            _ => false,
        }
    }

    fn is_unresolved(&self) -> bool {
        matches!(self, Self::Failed(_) | Self::Unrecorded { .. })
    }
}

/// Per-level verdict handed back to the parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeState {
    /// Already covered by an `ALL` marker before this run.
    Resolved,
    /// `ALL` written during this run.
    Promoted,
    /// Left open; `unresolved` when something below failed or was deferred.
    Open { unresolved: bool },
}

impl NodeState {
    fn is_processed(self) -> bool {
        matches!(self, Self::Resolved | Self::Promoted)
    }

    fn is_unresolved(self) -> bool {
        matches!(self, Self::Open { unresolved: true })
    }
}

#[derive(Debug, Clone)]
struct Partition {
    key: PathKey,
    prefix: String,
}

#[derive(Debug, Default)]
struct Tally {
    progressed: bool,
    unresolved: bool,
}

impl Tally {
    fn observe(&mut self, result: &LeafResult, empty_counts: bool) {
        self.progressed |= result.is_progress(empty_counts);
        self.unresolved |= result.is_unresolved();
    }
}

/// Depth-first walk of one company's partition tree.
///
/// The ledger sits behind a mutex so leaf workers can share it; aggregate
/// markers are only ever written from the coordinating thread.
pub struct Walker<'a, L: IdempotencyLog + Send> {
    ledger: &'a Mutex<L>,
    storage: &'a dyn ObjectStorage,
    archiver: Archiver<'a>,
    policy: RetentionPolicy,
    config: &'a RunConfig,
    leaves_started: AtomicUsize,
}

impl<'a, L: IdempotencyLog + Send> Walker<'a, L> {
    pub fn new(
        ledger: &'a Mutex<L>,
        storage: &'a dyn ObjectStorage,
        tool: &'a dyn ArchiveTool,
        config: &'a RunConfig,
    ) -> Self {
        Self {
            ledger,
            storage,
            archiver: Archiver::new(storage, tool, config),
            policy: RetentionPolicy::new(config.now, config.retention_days),
            config,
            leaves_started: AtomicUsize::new(0),
        }
    }

    /// How many of `wanted` leaves may start under `max_leaves`.
    /// Only the coordinating thread draws from the budget.
    fn take_leaf_budget(&self, wanted: usize) -> usize {
        let Some(limit) = self.config.max_leaves else {
            return wanted;
        };
        let started = self.leaves_started.load(Ordering::Relaxed);
        let granted = wanted.min(limit.saturating_sub(started));
        self.leaves_started.fetch_add(granted, Ordering::Relaxed);
        granted
    }

    fn ledger(&self) -> MutexGuard<'_, L> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn run(&self) -> RunSummary {
        let mut summary = RunSummary {
            company: self.config.company.clone(),
            dry_run: self.config.dry_run,
            ..RunSummary::default()
        };

        let company = match PathKey::company(&self.config.company) {
            Ok(key) => key,
            Err(err) => {
                summary.failed += 1;
                summary.failures.push(err.to_string());
                return summary;
            }
        };
        if self.ledger().contains(&company) {
            tracing::info!(company = %company, "company already marked ALL; nothing to do");
            summary.already_resolved += 1;
            return summary;
        }

        let Some(objects) = self.children(&company, &self.config.company_prefix(), &mut summary)
        else {
            return summary;
        };
        for object in objects {
            let name = object.prefix.trim_end_matches('/').rsplit('/').next().unwrap_or("");
            let value = object.key.object().unwrap_or("");
            if !self.config.wants_object(name, value) {
                tracing::debug!(key = %object.key, "object not selected; skipping");
                continue;
            }
            self.walk_object(&object, &mut summary);
        }

        tracing::info!(
            company = %self.config.company,
            archived = summary.archived,
            skipped = summary.skipped(),
            empty = summary.empty,
            failed = summary.failed,
            "walk finished"
        );
        summary
    }

    fn walk_object(&self, object: &Partition, summary: &mut RunSummary) -> NodeState {
        if self.ledger().contains(&object.key) {
            tracing::debug!(key = %object.key, "object already ALL; skipping");
            return NodeState::Resolved;
        }
        let Some(years) = self.children(&object.key, &object.prefix, summary) else {
            return NodeState::Open { unresolved: true };
        };

        let mut unresolved = false;
        let mut last = None;
        for year in &years {
            let state = self.walk_year(year, summary);
            unresolved |= state.is_unresolved();
            last = Some(state);
        }

        match last {
            Some(state) if state.is_processed() && !unresolved => self.promote(&object.key, summary),
            _ => NodeState::Open { unresolved },
        }
    }

    fn walk_year(&self, year: &Partition, summary: &mut RunSummary) -> NodeState {
        if self.ledger().contains(&year.key) {
            tracing::debug!(key = %year.key, "year already ALL; skipping");
            return NodeState::Resolved;
        }
        let Some(months) = self.children(&year.key, &year.prefix, summary) else {
            return NodeState::Open { unresolved: true };
        };

        let mut processed = false;
        let mut unresolved = false;
        for month in &months {
            let state = self.walk_month(month, summary);
            processed |= state.is_processed();
            unresolved |= state.is_unresolved();
        }

        if processed && !unresolved {
            self.promote(&year.key, summary)
        } else {
            NodeState::Open { unresolved }
        }
    }

    fn walk_month(&self, month: &Partition, summary: &mut RunSummary) -> NodeState {
        if self.ledger().contains(&month.key) {
            tracing::debug!(key = %month.key, "month already ALL; skipping");
            return NodeState::Resolved;
        }
        let Some(days) = self.children(&month.key, &month.prefix, summary) else {
            return NodeState::Open { unresolved: true };
        };

        let empty_counts = self.config.empty_counts_as_progress;
        let mut tally = Tally::default();
        let mut eligible = Vec::new();
        for day in days {
            if let Some(result) = self.precheck(&day) {
                summary.record(&day.key, &result);
                tally.observe(&result, empty_counts);
            } else {
                eligible.push(day);
            }
        }

        let granted = self.take_leaf_budget(eligible.len());
        let deferred = eligible.split_off(granted);
        if !deferred.is_empty() {
            tracing::info!(
                key = %month.key,
                deferred = deferred.len(),
                "leaf limit reached; leaving days for the next run"
            );
            summary.deferred += deferred.len();
            tally.unresolved = true;
        }

        for (day, result) in self.process_leaves(eligible) {
            summary.record(&day.key, &result);
            tally.observe(&result, empty_counts);
        }

        if tally.progressed && !tally.unresolved {
            self.promote(&month.key, summary)
        } else {
            NodeState::Open {
                unresolved: tally.unresolved,
            }
        }
    }

    /// Resolves a day without storage access when the ledger or the
    /// retention rules already decide it. `None` means the day needs a probe.
    fn precheck(&self, day: &Partition) -> Option<LeafResult> {
        {
            let ledger = self.ledger();
            if ledger.contains(&day.key) {
                tracing::debug!(key = %day.key, "day already resolved; skipping");
                return Some(LeafResult::AlreadyResolved(ledger.outcome(&day.key)));
            }
        }

        let (Some(year), Some(month), Some(d)) = (day.key.year(), day.key.month(), day.key.day())
        else {
            return Some(LeafResult::Failed(format!("{} is not a day key", day.key)));
        };
        match self.policy.evaluate(year, month, d) {
            Decision::Eligible => None,
            Decision::Skip(reason) => {
                if reason == SkipReason::Retention
                    && let Err(err) = partition_date(year, month, d)
                {
                    warn::emit(WarnEvent {
                        code: WarnCode::DateParse,
                        stage: "retention",
                        action: "skip-day",
                        key: &day.key.encode(),
                        retry: "none",
                        reason: "unparseable-partition-date",
                        err: &err.to_string(),
                    });
                }
                tracing::info!(key = %day.key, reason = reason.as_str(), "skipping by retention policy");
                Some(self.record_leaf(&day.key, Outcome::Ignored(reason), LeafResult::Ignored(reason)))
            }
        }
    }

    fn process_leaves(&self, days: Vec<Partition>) -> Vec<(Partition, LeafResult)> {
        let workers = self.config.max_workers.min(days.len());
        if workers <= 1 {
            return days
                .into_iter()
                .map(|day| {
                    let result = self.process_leaf(&day);
                    (day, result)
                })
                .collect();
        }

        let queue = Mutex::new(days.into_iter().enumerate().collect::<VecDeque<_>>());
        let done = Mutex::new(Vec::new());
        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| {
                    loop {
                        let next = queue.lock().unwrap_or_else(PoisonError::into_inner).pop_front();
                        let Some((idx, day)) = next else {
                            break;
                        };
                        let result = self.process_leaf(&day);
                        done.lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .push((idx, day, result));
                    }
                });
            }
        });

        let mut done = done.into_inner().unwrap_or_else(PoisonError::into_inner);
        done.sort_by_key(|(idx, _, _)| *idx);
        done.into_iter().map(|(_, day, result)| (day, result)).collect()
    }

    fn process_leaf(&self, day: &Partition) -> LeafResult {
        let job = match self.archiver.probe(&day.key, &day.prefix) {
            Ok(Probe::Empty(objects)) => {
                tracing::info!(key = %day.key, objects, "fewer than {} objects; marking EMPTY", self.config.min_objects);
                return self.record_leaf(&day.key, Outcome::Empty, LeafResult::Empty);
            }
            Ok(Probe::Ready(job)) => job,
            Err(err) => {
                warn::emit(WarnEvent {
                    code: WarnCode::ListingFailed,
                    stage: "probe",
                    action: "count-objects",
                    key: &day.key.encode(),
                    retry: "next-run",
                    reason: "count-failed",
                    err: &err.to_string(),
                });
                return LeafResult::Failed(err.to_string());
            }
        };

        let report = self.archiver.archive(&job);
        match report.archive {
            StepResult::Success => self.record_leaf(
                &day.key,
                Outcome::Done,
                LeafResult::Archived {
                    delete: report.delete,
                },
            ),
            StepResult::Failed(reason) => LeafResult::Failed(reason),
            StepResult::Skipped(reason) => LeafResult::Failed(reason),
        }
    }

    /// Appends under the ledger lock; a key some other worker recorded
    /// first is not written twice.
    fn record_leaf(&self, key: &PathKey, outcome: Outcome, result: LeafResult) -> LeafResult {
        let appended = {
            let mut ledger = self.ledger();
            if ledger.contains(key) {
                return result;
            }
            ledger.append(key, outcome)
        };
        match appended {
            Ok(()) => result,
            Err(err) => {
                let acted = matches!(result, LeafResult::Archived { .. }) && !self.config.dry_run;
                warn::emit(WarnEvent {
                    code: WarnCode::LedgerWriteFailed,
                    stage: "record",
                    action: if acted { "reconcile" } else { "append" },
                    key: &key.encode(),
                    retry: "next-run",
                    reason: if acted {
                        "archived-but-unrecorded"
                    } else {
                        "decision-unrecorded"
                    },
                    err: &err.to_string(),
                });
                LeafResult::Unrecorded {
                    outcome,
                    reason: err.to_string(),
                }
            }
        }
    }

    fn promote(&self, key: &PathKey, summary: &mut RunSummary) -> NodeState {
        let appended = self.ledger().append(key, Outcome::All);
        match appended {
            Ok(()) => {
                tracing::info!(key = %key, "marked ALL");
                summary.aggregates_written += 1;
                NodeState::Promoted
            }
            Err(err) => {
                warn::emit(WarnEvent {
                    code: WarnCode::LedgerWriteFailed,
                    stage: "promote",
                    action: "append-all",
                    key: &key.encode(),
                    retry: "next-run",
                    reason: "aggregate-unrecorded",
                    err: &err.to_string(),
                });
                summary.ledger_write_errors += 1;
                summary.failures.push(format!("{key}:ALL: {err}"));
                NodeState::Open { unresolved: true }
            }
        }
    }

    /// Lists the next level, sorted by raw partition value. `None` when the
    /// listing itself failed; the branch is abandoned and reported.
    fn children(
        &self,
        parent: &PathKey,
        prefix: &str,
        summary: &mut RunSummary,
    ) -> Option<Vec<Partition>> {
        let names = match self.storage.list_common_prefixes(prefix) {
            Ok(names) => names,
            Err(err) => {
                let err = VaultError::Listing {
                    prefix: prefix.to_string(),
                    reason: format!("{err:#}"),
                };
                warn::emit(WarnEvent {
                    code: WarnCode::ListingFailed,
                    stage: "walk",
                    action: "list",
                    key: &parent.encode(),
                    retry: "next-run",
                    reason: "listing-failed",
                    err: &err.to_string(),
                });
                summary.listing_failed(&err);
                return None;
            }
        };

        let mut out = Vec::with_capacity(names.len());
        for name in names {
            match parent.child(partition_value(&name)) {
                Ok(key) => out.push(Partition {
                    key,
                    prefix: child_prefix(prefix, &name),
                }),
                Err(err) => {
                    warn::emit(WarnEvent {
                        code: WarnCode::InvalidPartition,
                        stage: "walk",
                        action: "skip-partition",
                        key: &format!("{prefix}{name}"),
                        retry: "none",
                        reason: "invalid-segment",
                        err: &err.to_string(),
                    });
                    summary.invalid_partitions += 1;
                }
            }
        }
        out.sort_by(|a, b| a.key.cmp(&b.key));
        Some(out)
    }
}
