use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};

use crate::config::RepoTarget;
use crate::github::models::{RunStatus, WorkflowRun};

/// Statuses counted by the `workflow_runs_count` family, matching the set
/// the GitHub runs listing accepts as a `status` filter.
pub const WORKFLOW_STATUSES: [&str; 6] = [
    "completed",
    "cancelled",
    "failure",
    "success",
    "timed_out",
    "in_progress",
];

/// The sample families this exporter can derive. The enabled set comes from
/// configuration; names are defined here once rather than scattered as
/// string literals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MetricKind {
    Duration,
    Status,
    QueueTime,
    Counts,
}

impl MetricKind {
    pub const ALL: [MetricKind; 4] = [
        MetricKind::Duration,
        MetricKind::Status,
        MetricKind::QueueTime,
        MetricKind::Counts,
    ];

    /// Metric family name as it appears in the exposition output.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Duration => "workflow_run_duration_seconds",
            MetricKind::Status => "workflow_run_status",
            MetricKind::QueueTime => "workflow_queue_time_seconds",
            MetricKind::Counts => "workflow_runs_count",
        }
    }

    pub fn help(&self) -> &'static str {
        match self {
            MetricKind::Duration => "Workflow run duration from creation to completion",
            MetricKind::Status => "Workflow run state as a numeric code",
            MetricKind::QueueTime => "Time a workflow run spent queued before starting",
            MetricKind::Counts => "Total workflow runs per status",
        }
    }

    /// Parses a configuration token (`GHA_EXPORTER_METRICS`).
    pub fn parse(token: &str) -> Option<MetricKind> {
        match token {
            "duration" => Some(MetricKind::Duration),
            "status" => Some(MetricKind::Status),
            "queue_time" => Some(MetricKind::QueueTime),
            "counts" => Some(MetricKind::Counts),
            _ => None,
        }
    }
}

/// A single labeled numeric sample destined for the metrics backend.
/// Immutable once produced; labels are sorted by key for deterministic
/// encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub kind: MetricKind,
    pub value: f64,
    pub labels: BTreeMap<String, String>,
    pub timestamp_ms: i64,
}

/// Numeric code for the `workflow_run_status` family. Queued states sit
/// below the running state, terminal conclusions occupy the rest.
pub fn state_code(run: &WorkflowRun) -> f64 {
    use crate::github::models::RunConclusion::*;
    match run.status {
        RunStatus::Queued | RunStatus::Requested | RunStatus::Waiting | RunStatus::Pending => 0.0,
        RunStatus::InProgress => 1.0,
        RunStatus::Completed => match run.conclusion {
            Some(Success) => 2.0,
            Some(Failure) => 3.0,
            Some(Cancelled) => 4.0,
            Some(TimedOut) => 5.0,
            Some(Skipped) => 6.0,
            Some(Neutral) => 7.0,
            Some(ActionRequired) => 8.0,
            _ => 9.0,
        },
        RunStatus::Unknown => 9.0,
    }
}

fn run_labels(run: &WorkflowRun, target: &RepoTarget) -> BTreeMap<String, String> {
    let workflow = target
        .workflow
        .clone()
        .or_else(|| run.name.clone())
        .unwrap_or_default();
    let conclusion = run
        .conclusion
        .map(|c| c.as_str().to_string())
        .unwrap_or_else(|| run.status.as_str().to_string());
    BTreeMap::from([
        ("repo".to_string(), target.repo_label()),
        ("workflow".to_string(), workflow),
        ("branch".to_string(), run.head_branch.clone().unwrap_or_default()),
        ("conclusion".to_string(), conclusion),
    ])
}

/// Derives the enabled per-run samples for one workflow run.
///
/// Runs that have not completed carry no duration or queue-time sample;
/// their state is still observable through the status family.
pub fn observe_run(
    run: &WorkflowRun,
    target: &RepoTarget,
    enabled: &BTreeSet<MetricKind>,
) -> Vec<Observation> {
    let labels = run_labels(run, target);
    let mut observations = Vec::new();

    if enabled.contains(&MetricKind::Status) {
        observations.push(Observation {
            kind: MetricKind::Status,
            value: state_code(run),
            labels: labels.clone(),
            timestamp_ms: run.updated_at.timestamp_millis(),
        });
    }

    if run.is_terminal() {
        if enabled.contains(&MetricKind::Duration) {
            let duration = (run.updated_at - run.created_at).num_milliseconds() as f64 / 1000.0;
            observations.push(Observation {
                kind: MetricKind::Duration,
                value: duration.max(0.0),
                labels: labels.clone(),
                timestamp_ms: run.created_at.timestamp_millis(),
            });
        }
        if enabled.contains(&MetricKind::QueueTime) {
            if let Some(started_at) = run.run_started_at {
                let queued = (started_at - run.created_at).num_milliseconds() as f64 / 1000.0;
                observations.push(Observation {
                    kind: MetricKind::QueueTime,
                    value: queued.max(0.0),
                    labels,
                    timestamp_ms: run.created_at.timestamp_millis(),
                });
            }
        }
    }

    observations
}

/// One per-status count sample, timestamped at the cycle start.
pub fn observe_count(
    target: &RepoTarget,
    status: &str,
    count: u64,
    at: DateTime<Utc>,
) -> Observation {
    Observation {
        kind: MetricKind::Counts,
        value: count as f64,
        labels: BTreeMap::from([
            ("repo".to_string(), target.repo_label()),
            ("workflow".to_string(), target.workflow.clone().unwrap_or_default()),
            ("status".to_string(), status.to_string()),
        ]),
        timestamp_ms: at.timestamp_millis(),
    }
}
