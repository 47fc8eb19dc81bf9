use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use reqwest::Url;

use crate::common::error::{ExporterError, Result};
use crate::observation::MetricKind;

const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";
const DEFAULT_REPOS: &str = "AztecProtocol/aztec-packages:ci3.yml";
const DEFAULT_EVENT: &str = "merge_group";
const DEFAULT_POLL_INTERVAL_SECS: u64 = 300;
const DEFAULT_LOOKBACK_RUNS: usize = 100;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_MAX_RATE_LIMIT_WAIT_SECS: u64 = 900;
const DEFAULT_BACKFILL_COUNT: usize = 10_000;
const DEFAULT_METRICS_ADDR: &str = "0.0.0.0:9898";
const DEFAULT_LOG_DIR: &str = "logs";

/// A repository to poll, optionally scoped to a single workflow file.
///
/// Parsed from `owner/repo` or `owner/repo:workflow_file`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoTarget {
    pub owner: String,
    pub repo: String,
    pub workflow: Option<String>,
}

impl RepoTarget {
    /// Value of the `repo` label on every sample for this target.
    pub fn repo_label(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }

    /// Unique key for per-target collector state.
    pub fn slug(&self) -> String {
        match &self.workflow {
            Some(wf) => format!("{}/{}:{}", self.owner, self.repo, wf),
            None => format!("{}/{}", self.owner, self.repo),
        }
    }
}

impl FromStr for RepoTarget {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (repo_part, workflow) = match s.split_once(':') {
            Some((r, wf)) if !wf.is_empty() => (r, Some(wf.to_string())),
            Some((_, _)) => return Err(format!("empty workflow file in target '{s}'")),
            None => (s, None),
        };
        let (owner, repo) = repo_part
            .split_once('/')
            .ok_or_else(|| format!("target '{s}' is not of the form owner/repo[:workflow]"))?;
        if owner.is_empty() || repo.is_empty() {
            return Err(format!("target '{s}' has an empty owner or repo"));
        }
        Ok(RepoTarget {
            owner: owner.to_string(),
            repo: repo.to_string(),
            workflow,
        })
    }
}

/// Process-wide configuration, read from the environment once at startup
/// and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct Config {
    pub github_token: String,
    pub victoria_url: Url,
    pub github_api_url: Url,
    pub targets: Vec<RepoTarget>,
    /// Event filter for the runs listing; `None` disables the filter.
    pub event_filter: Option<String>,
    pub poll_interval: Duration,
    pub lookback_runs: usize,
    pub enabled_metrics: BTreeSet<MetricKind>,
    pub http_timeout: Duration,
    pub max_retries: u32,
    pub max_rate_limit_wait: Duration,
    pub backfill_count: usize,
    pub metrics_addr: SocketAddr,
    pub log_dir: PathBuf,
}

impl Config {
    /// Loads the configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::load(|var| std::env::var(var).ok())
    }

    /// Loads the configuration through an injected lookup so tests can
    /// supply an environment without touching process state.
    pub fn load<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let github_token = required(&lookup, "GITHUB_TOKEN")?;
        let victoria_url = required_url(&lookup, "VM_URL")?;

        let github_api_url = match lookup("GITHUB_API_URL") {
            Some(raw) => parse_url("GITHUB_API_URL", &raw)?,
            None => Url::parse(DEFAULT_GITHUB_API_URL).expect("default API URL parses"),
        };

        let repos_raw =
            lookup("GHA_EXPORTER_REPOS").unwrap_or_else(|| DEFAULT_REPOS.to_string());
        let mut targets = Vec::new();
        for token in repos_raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let target = token.parse::<RepoTarget>().map_err(|reason| {
                ExporterError::InvalidVar {
                    var: "GHA_EXPORTER_REPOS".to_string(),
                    reason,
                }
            })?;
            targets.push(target);
        }
        if targets.is_empty() {
            return Err(ExporterError::InvalidVar {
                var: "GHA_EXPORTER_REPOS".to_string(),
                reason: "no targets configured".to_string(),
            });
        }

        let event_filter = match lookup("GHA_EXPORTER_EVENT") {
            Some(raw) if raw.trim().is_empty() => None,
            Some(raw) => Some(raw.trim().to_string()),
            None => Some(DEFAULT_EVENT.to_string()),
        };

        let poll_interval = Duration::from_secs(optional_parse(
            &lookup,
            "GHA_EXPORTER_POLL_INTERVAL_SECS",
            DEFAULT_POLL_INTERVAL_SECS,
        )?);
        let lookback_runs = optional_parse(
            &lookup,
            "GHA_EXPORTER_LOOKBACK_RUNS",
            DEFAULT_LOOKBACK_RUNS,
        )?;

        let enabled_metrics = match lookup("GHA_EXPORTER_METRICS") {
            Some(raw) => parse_metric_list(&raw)?,
            None => MetricKind::ALL.iter().copied().collect(),
        };

        let http_timeout = Duration::from_secs(optional_parse(
            &lookup,
            "GHA_EXPORTER_HTTP_TIMEOUT_SECS",
            DEFAULT_HTTP_TIMEOUT_SECS,
        )?);
        let max_retries =
            optional_parse(&lookup, "GHA_EXPORTER_MAX_RETRIES", DEFAULT_MAX_RETRIES)?;
        let max_rate_limit_wait = Duration::from_secs(optional_parse(
            &lookup,
            "GHA_EXPORTER_MAX_RATE_LIMIT_WAIT_SECS",
            DEFAULT_MAX_RATE_LIMIT_WAIT_SECS,
        )?);
        let backfill_count = optional_parse(
            &lookup,
            "GHA_EXPORTER_BACKFILL_COUNT",
            DEFAULT_BACKFILL_COUNT,
        )?;

        let metrics_addr_raw = lookup("GHA_EXPORTER_METRICS_ADDR")
            .unwrap_or_else(|| DEFAULT_METRICS_ADDR.to_string());
        let metrics_addr = metrics_addr_raw.parse::<SocketAddr>().map_err(|e| {
            ExporterError::InvalidVar {
                var: "GHA_EXPORTER_METRICS_ADDR".to_string(),
                reason: e.to_string(),
            }
        })?;

        let log_dir = PathBuf::from(
            lookup("GHA_EXPORTER_LOG_DIR").unwrap_or_else(|| DEFAULT_LOG_DIR.to_string()),
        );

        Ok(Config {
            github_token,
            victoria_url,
            github_api_url,
            targets,
            event_filter,
            poll_interval,
            lookback_runs,
            enabled_metrics,
            http_timeout,
            max_retries,
            max_rate_limit_wait,
            backfill_count,
            metrics_addr,
            log_dir,
        })
    }
}

fn required<F>(lookup: &F, var: &str) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        Some(value) if !value.trim().is_empty() => Ok(value),
        Some(_) => Err(ExporterError::InvalidVar {
            var: var.to_string(),
            reason: "value is empty".to_string(),
        }),
        None => Err(ExporterError::MissingVar(var.to_string())),
    }
}

fn required_url<F>(lookup: &F, var: &str) -> Result<Url>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = required(lookup, var)?;
    parse_url(var, &raw)
}

fn parse_url(var: &str, raw: &str) -> Result<Url> {
    let url = Url::parse(raw).map_err(|e| ExporterError::InvalidVar {
        var: var.to_string(),
        reason: e.to_string(),
    })?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ExporterError::InvalidVar {
            var: var.to_string(),
            reason: format!("unsupported scheme '{}'", url.scheme()),
        });
    }
    Ok(url)
}

fn optional_parse<F, T>(lookup: &F, var: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        Some(raw) => raw.trim().parse::<T>().map_err(|e| ExporterError::InvalidVar {
            var: var.to_string(),
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn parse_metric_list(raw: &str) -> Result<BTreeSet<MetricKind>> {
    let mut kinds = BTreeSet::new();
    for token in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        let kind = MetricKind::parse(token).ok_or_else(|| ExporterError::InvalidVar {
            var: "GHA_EXPORTER_METRICS".to_string(),
            reason: format!("unknown metric family '{token}'"),
        })?;
        kinds.insert(kind);
    }
    if kinds.is_empty() {
        return Err(ExporterError::InvalidVar {
            var: "GHA_EXPORTER_METRICS".to_string(),
            reason: "no metric families enabled".to_string(),
        });
    }
    Ok(kinds)
}
