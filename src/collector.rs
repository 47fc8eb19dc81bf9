use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::common::error::Result;
use crate::config::{Config, RepoTarget};
use crate::github::WorkflowRunsApi;
use crate::observability;
use crate::observation::{self, MetricKind, Observation, WORKFLOW_STATUSES};
use crate::publisher::ObservationSink;

/// GitHub caps the runs listing at 100 entries per page.
const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleStatus {
    /// Every target paginated to the end.
    Clean,
    /// At least one page or count query was dropped.
    Partial,
    /// Collection stopped early on an authentication failure.
    Aborted,
}

/// One scheduled round of fetch-then-publish. Observations never outlive
/// the cycle that produced them.
#[derive(Debug)]
pub struct CollectionCycle {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub observations: Vec<Observation>,
    pub tallies: Vec<TargetTally>,
    pub status: CycleStatus,
}

#[derive(Debug, Default, Clone)]
pub struct TargetTally {
    pub target: String,
    pub runs_observed: usize,
    pub pages_fetched: u32,
    pub pages_dropped: u32,
    pub counts_failed: u32,
}

/// In-memory dedup state for one target. There is no durable checkpoint:
/// a restart re-scans the lookback window and re-publishes samples the
/// backend overwrites anyway.
#[derive(Debug, Default)]
struct TargetState {
    /// Highest run id whose terminal samples were emitted by a pagination
    /// that completed without drops. Everything at or below it is done.
    high_water: u64,
    /// Runs seen in a non-terminal state, re-observed until they complete.
    /// Always above the high-water mark.
    pending: HashSet<u64>,
}

/// Walks the configured targets each cycle and turns new or still-moving
/// workflow runs into observations.
pub struct Collector {
    api: Arc<dyn WorkflowRunsApi>,
    targets: Vec<RepoTarget>,
    enabled: BTreeSet<MetricKind>,
    lookback_runs: usize,
    state: HashMap<String, TargetState>,
}

impl Collector {
    pub fn new(api: Arc<dyn WorkflowRunsApi>, config: &Config) -> Self {
        Self {
            api,
            targets: config.targets.clone(),
            enabled: config.enabled_metrics.clone(),
            lookback_runs: config.lookback_runs.max(1),
            state: HashMap::new(),
        }
    }

    /// Runs one collection cycle across all targets.
    ///
    /// Failures scoped to one page or one target degrade the cycle to
    /// `Partial`; an authentication failure aborts remaining collection
    /// but already-collected observations are kept for publishing.
    pub async fn run_cycle(&mut self) -> CollectionCycle {
        let mut cycle = CollectionCycle {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            observations: Vec::new(),
            tallies: Vec::new(),
            status: CycleStatus::Clean,
        };

        let targets = self.targets.clone();
        for target in &targets {
            match self.collect_target(target, &mut cycle).await {
                Ok(()) => {}
                Err(err) if err.is_auth() => {
                    error!(
                        cycle_id = %cycle.id,
                        target = %target.slug(),
                        %err,
                        "authentication failed, aborting collection for this cycle"
                    );
                    observability::metrics::cycle_aborted();
                    cycle.status = CycleStatus::Aborted;
                    break;
                }
                Err(err) if err.is_rate_limit() => {
                    warn!(
                        cycle_id = %cycle.id,
                        target = %target.slug(),
                        %err,
                        "rate limit wait exceeds the cap, ending collection for this cycle"
                    );
                    cycle.status = CycleStatus::Partial;
                    break;
                }
                Err(err) => {
                    warn!(
                        cycle_id = %cycle.id,
                        target = %target.slug(),
                        %err,
                        "target collection incomplete"
                    );
                    if cycle.status == CycleStatus::Clean {
                        cycle.status = CycleStatus::Partial;
                    }
                }
            }
        }
        cycle
    }

    async fn collect_target(
        &mut self,
        target: &RepoTarget,
        cycle: &mut CollectionCycle,
    ) -> Result<()> {
        let mut tally = TargetTally {
            target: target.slug(),
            ..Default::default()
        };
        let result = self.collect_target_inner(target, cycle, &mut tally).await;
        if tally.pages_dropped > 0 && cycle.status == CycleStatus::Clean {
            cycle.status = CycleStatus::Partial;
        }
        observability::metrics::runs_observed(tally.runs_observed as u64);
        cycle.tallies.push(tally);
        result
    }

    async fn collect_target_inner(
        &mut self,
        target: &RepoTarget,
        cycle: &mut CollectionCycle,
        tally: &mut TargetTally,
    ) -> Result<()> {
        let slug = target.slug();

        if self.enabled.contains(&MetricKind::Counts) {
            for status in WORKFLOW_STATUSES {
                match self.api.count_runs(target, status).await {
                    Ok(count) => cycle.observations.push(observation::observe_count(
                        target,
                        status,
                        count,
                        cycle.started_at,
                    )),
                    Err(err) if err.is_auth() || err.is_rate_limit() => return Err(err),
                    Err(err) => {
                        tally.counts_failed += 1;
                        warn!(target = %slug, status, %err, "run count query failed");
                    }
                }
            }
        }

        let state = self.state.entry(slug.clone()).or_default();
        let per_page = MAX_PAGE_SIZE.min(self.lookback_runs as u32).max(1);
        let mut page: u32 = 1;
        let mut examined: usize = 0;
        let mut max_terminal: u64 = 0;
        let mut seen: HashSet<u64> = HashSet::new();
        let mut first_id: Option<u64> = None;
        let mut last_id: Option<u64> = None;
        let mut clean = true;

        'pages: loop {
            let runs_page = match self.api.list_runs(target, page, per_page, false).await {
                Ok(p) => p,
                Err(err) if err.is_auth() || err.is_rate_limit() => return Err(err),
                Err(err) => {
                    clean = false;
                    tally.pages_dropped += 1;
                    observability::metrics::page_dropped();
                    warn!(
                        target = %slug,
                        page,
                        first_run_id = first_id.unwrap_or(0),
                        last_run_id = last_id.unwrap_or(0),
                        %err,
                        "page dropped after exhausting retries"
                    );
                    break 'pages;
                }
            };
            tally.pages_fetched += 1;
            observability::metrics::page_fetched();

            if runs_page.runs.is_empty() {
                break;
            }

            for run in &runs_page.runs {
                // Runs list newest first; a non-pending run at or below
                // the mark means everything older is already emitted.
                if run.id <= state.high_water && !state.pending.contains(&run.id) {
                    break 'pages;
                }

                examined += 1;
                seen.insert(run.id);
                first_id.get_or_insert(run.id);
                last_id = Some(run.id);

                cycle
                    .observations
                    .extend(observation::observe_run(run, target, &self.enabled));
                tally.runs_observed += 1;

                if run.is_terminal() {
                    if state.pending.remove(&run.id) {
                        info!(target = %slug, run_id = run.id, "pending run completed");
                    }
                    max_terminal = max_terminal.max(run.id);
                } else {
                    state.pending.insert(run.id);
                }

                if examined >= self.lookback_runs {
                    break 'pages;
                }
            }
            page += 1;
        }

        if clean {
            // Advance the mark only past ids that can never change again;
            // the lowest pending run holds it back so later cycles still
            // reach that run.
            let candidate = max_terminal.max(state.high_water);
            state.high_water = match state.pending.iter().min() {
                Some(&lowest_pending) => candidate.min(lowest_pending.saturating_sub(1)),
                None => candidate,
            };

            // Pending runs the scan no longer reaches have left the
            // lookback window; log them for manual backfill.
            let stale: Vec<u64> = state
                .pending
                .iter()
                .copied()
                .filter(|id| !seen.contains(id))
                .collect();
            for id in stale {
                state.pending.remove(&id);
                warn!(
                    target = %slug,
                    run_id = id,
                    "pending run left the lookback window before completing"
                );
            }
        }

        Ok(())
    }

    /// Walks up to `budget` historical completed runs per target, oldest
    /// data flowing through the same sink one page at a time. Collection
    /// state is untouched; the normal poll loop dedups independently.
    pub async fn backfill(&self, sink: &dyn ObservationSink, budget: usize) {
        for target in &self.targets {
            let slug = target.slug();
            // Page size stays fixed for the whole walk; shrinking it as the
            // budget drains would shift later pages back over runs already
            // fetched. The final page is trimmed in memory instead.
            let per_page = MAX_PAGE_SIZE.min(budget.max(1) as u32);
            let mut remaining = budget;
            let mut page: u32 = 1;
            info!(target = %slug, budget, "backfilling historical runs");

            while remaining > 0 {
                let runs_page = match self.api.list_runs(target, page, per_page, true).await {
                    Ok(p) => p,
                    Err(err) => {
                        warn!(target = %slug, page, %err, "backfill stopped early");
                        break;
                    }
                };
                if runs_page.runs.is_empty() {
                    break;
                }

                let take = runs_page.runs.len().min(remaining);
                let mut batch = Vec::new();
                for run in runs_page.runs.iter().take(take) {
                    batch.extend(observation::observe_run(run, target, &self.enabled));
                }
                remaining -= take;

                if let Err(err) = sink.publish(&batch).await {
                    warn!(target = %slug, page, %err, "backfill batch dropped");
                }
                page += 1;
            }
        }
    }
}
