pub mod client;
pub mod models;
pub mod rate_limit;

use async_trait::async_trait;

use crate::common::error::Result;
use crate::config::RepoTarget;
use crate::github::models::RunsPage;

/// Port over the workflow-runs listing so the collector can be exercised
/// against scripted pages in tests.
#[async_trait]
pub trait WorkflowRunsApi: Send + Sync {
    /// One page of the runs listing for a target, newest first.
    /// `completed_only` narrows the listing to finished runs (backfill).
    async fn list_runs(
        &self,
        target: &RepoTarget,
        page: u32,
        per_page: u32,
        completed_only: bool,
    ) -> Result<RunsPage>;

    /// `total_count` of runs for a target in the given status.
    async fn count_runs(&self, target: &RepoTarget, status: &str) -> Result<u64>;
}
