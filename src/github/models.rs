use chrono::{DateTime, Utc};
use serde::Deserialize;

/// One page of the workflow-runs listing.
#[derive(Debug, Clone, Deserialize)]
pub struct RunsPage {
    pub total_count: u64,
    #[serde(rename = "workflow_runs", default)]
    pub runs: Vec<WorkflowRun>,
}

/// A workflow run as returned by the GitHub Actions API, reduced to the
/// fields the exporter derives samples from.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowRun {
    pub id: u64,
    pub name: Option<String>,
    pub run_number: u64,
    pub status: RunStatus,
    pub conclusion: Option<RunConclusion>,
    pub head_branch: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub run_started_at: Option<DateTime<Utc>>,
}

impl WorkflowRun {
    /// Completed runs never change again; everything else is re-observed
    /// on the next cycle.
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, RunStatus::Completed)
    }
}

/// Run lifecycle state. `Unknown` absorbs states GitHub adds later so a
/// new value never breaks deserialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    InProgress,
    Queued,
    Requested,
    Waiting,
    Pending,
    #[serde(other)]
    Unknown,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Completed => "completed",
            RunStatus::InProgress => "in_progress",
            RunStatus::Queued => "queued",
            RunStatus::Requested => "requested",
            RunStatus::Waiting => "waiting",
            RunStatus::Pending => "pending",
            RunStatus::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunConclusion {
    Success,
    Failure,
    Cancelled,
    TimedOut,
    ActionRequired,
    Neutral,
    Skipped,
    Stale,
    StartupFailure,
    #[serde(other)]
    Unknown,
}

impl RunConclusion {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunConclusion::Success => "success",
            RunConclusion::Failure => "failure",
            RunConclusion::Cancelled => "cancelled",
            RunConclusion::TimedOut => "timed_out",
            RunConclusion::ActionRequired => "action_required",
            RunConclusion::Neutral => "neutral",
            RunConclusion::Skipped => "skipped",
            RunConclusion::Stale => "stale",
            RunConclusion::StartupFailure => "startup_failure",
            RunConclusion::Unknown => "unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn page_deserializes_from_api_shape() {
        let payload = json!({
            "total_count": 2,
            "workflow_runs": [
                {
                    "id": 101,
                    "name": "CI",
                    "run_number": 41,
                    "status": "completed",
                    "conclusion": "success",
                    "head_branch": "main",
                    "created_at": "2026-03-01T12:00:00Z",
                    "updated_at": "2026-03-01T12:02:00Z",
                    "run_started_at": "2026-03-01T12:00:15Z"
                },
                {
                    "id": 102,
                    "name": "CI",
                    "run_number": 42,
                    "status": "in_progress",
                    "conclusion": null,
                    "head_branch": "feature",
                    "created_at": "2026-03-01T12:05:00Z",
                    "updated_at": "2026-03-01T12:05:00Z",
                    "run_started_at": null
                }
            ]
        });
        let page: RunsPage = serde_json::from_value(payload).unwrap();
        assert_eq!(page.total_count, 2);
        assert_eq!(page.runs.len(), 2);
        assert!(page.runs[0].is_terminal());
        assert_eq!(page.runs[0].conclusion, Some(RunConclusion::Success));
        assert!(!page.runs[1].is_terminal());
        assert!(page.runs[1].conclusion.is_none());
    }

    #[test]
    fn unknown_states_fall_back_instead_of_failing() {
        let payload = json!({
            "id": 103,
            "name": "CI",
            "run_number": 43,
            "status": "hibernating",
            "conclusion": "abducted",
            "head_branch": "main",
            "created_at": "2026-03-01T12:00:00Z",
            "updated_at": "2026-03-01T12:00:00Z",
            "run_started_at": null
        });
        let run: WorkflowRun = serde_json::from_value(payload).unwrap();
        assert_eq!(run.status, RunStatus::Unknown);
        assert_eq!(run.conclusion, Some(RunConclusion::Unknown));
    }
}
