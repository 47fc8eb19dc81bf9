use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use reqwest::header::{HeaderMap, ACCEPT, RETRY_AFTER};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::common::error::{ExporterError, Result};
use crate::config::{Config, RepoTarget};
use crate::github::models::RunsPage;
use crate::github::rate_limit::RateLimitState;
use crate::github::WorkflowRunsApi;
use crate::observability;

const GITHUB_ACCEPT: &str = "application/vnd.github+json";
const USER_AGENT: &str = concat!("gha-exporter/", env!("CARGO_PKG_VERSION"));
const BACKOFF_BASE: Duration = Duration::from_millis(250);
const BACKOFF_JITTER_MS: u64 = 250;

/// Authenticated client for the GitHub Actions REST API.
///
/// Owns one `reqwest::Client` with a bounded per-request timeout and the
/// shared [`RateLimitState`], consulted before and updated after every
/// call. Transient failures retry with jittered exponential backoff up to
/// the configured ceiling; rate-limit responses wait for the reset instead
/// of failing.
pub struct GithubClient {
    http: reqwest::Client,
    api_base: String,
    token: String,
    event_filter: Option<String>,
    max_retries: u32,
    max_rate_limit_wait: Duration,
    rate_limit: Arc<RateLimitState>,
}

impl GithubClient {
    pub fn new(config: &Config, rate_limit: Arc<RateLimitState>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            http,
            api_base: config.github_api_url.as_str().trim_end_matches('/').to_string(),
            token: config.github_token.clone(),
            event_filter: config.event_filter.clone(),
            max_retries: config.max_retries,
            max_rate_limit_wait: config.max_rate_limit_wait,
            rate_limit,
        })
    }

    fn runs_url(&self, target: &RepoTarget) -> String {
        match &target.workflow {
            Some(workflow) => format!(
                "{}/repos/{}/{}/actions/workflows/{}/runs",
                self.api_base, target.owner, target.repo, workflow
            ),
            None => format!(
                "{}/repos/{}/{}/actions/runs",
                self.api_base, target.owner, target.repo
            ),
        }
    }

    async fn get_json<T>(&self, url: &str, query: &[(&str, String)]) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let mut attempt: u32 = 0;
        loop {
            if let Some(wait) = self.rate_limit.required_wait(Utc::now()).await {
                if wait > self.max_rate_limit_wait {
                    return Err(ExporterError::RateLimited {
                        wait_secs: wait.as_secs(),
                    });
                }
                warn!(
                    wait_secs = wait.as_secs(),
                    url, "GitHub rate limit exhausted, waiting for reset"
                );
                observability::metrics::rate_limit_wait(wait.as_secs_f64());
                tokio::time::sleep(wait).await;
            }

            let sent = self
                .http
                .get(url)
                .query(query)
                .bearer_auth(&self.token)
                .header(ACCEPT, GITHUB_ACCEPT)
                .send()
                .await;

            let response = match sent {
                Ok(response) => response,
                Err(err) => {
                    if attempt >= self.max_retries {
                        return Err(ExporterError::Transient(err.to_string()));
                    }
                    attempt += 1;
                    let delay = backoff_delay(attempt);
                    debug!(%err, attempt, delay_ms = delay.as_millis() as u64, "request failed, backing off");
                    observability::metrics::fetch_retry();
                    tokio::time::sleep(delay).await;
                    continue;
                }
            };

            self.rate_limit.observe_headers(response.headers()).await;
            let status = response.status();

            if status.is_success() {
                let bytes = response.bytes().await?;
                return Ok(serde_json::from_slice(&bytes)?);
            }

            if status == StatusCode::UNAUTHORIZED {
                return Err(ExporterError::Auth {
                    status: status.as_u16(),
                });
            }

            if status == StatusCode::FORBIDDEN || status == StatusCode::TOO_MANY_REQUESTS {
                if let Some(retry_after) = rate_limit_signature(response.headers()) {
                    if attempt >= self.max_retries {
                        return Err(ExporterError::RateLimited {
                            wait_secs: retry_after.map_or(0, |d| d.as_secs()),
                        });
                    }
                    self.rate_limit.mark_exhausted(retry_after).await;
                    attempt += 1;
                    // the wait itself happens at the top of the loop
                    continue;
                }
                if status == StatusCode::FORBIDDEN {
                    return Err(ExporterError::Auth {
                        status: status.as_u16(),
                    });
                }
            }

            if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                if attempt >= self.max_retries {
                    return Err(ExporterError::Transient(format!(
                        "status {status} from {url}"
                    )));
                }
                attempt += 1;
                let delay = backoff_delay(attempt);
                warn!(%status, attempt, delay_ms = delay.as_millis() as u64, "transient GitHub error, backing off");
                observability::metrics::fetch_retry();
                tokio::time::sleep(delay).await;
                continue;
            }

            let message = response.text().await.unwrap_or_default();
            return Err(ExporterError::Api {
                status: status.as_u16(),
                message: truncate(&message),
            });
        }
    }
}

#[async_trait]
impl WorkflowRunsApi for GithubClient {
    async fn list_runs(
        &self,
        target: &RepoTarget,
        page: u32,
        per_page: u32,
        completed_only: bool,
    ) -> Result<RunsPage> {
        let mut query: Vec<(&str, String)> = vec![
            ("per_page", per_page.to_string()),
            ("page", page.to_string()),
        ];
        if let Some(event) = &self.event_filter {
            query.push(("event", event.clone()));
        }
        if completed_only {
            query.push(("status", "completed".to_string()));
        }
        self.get_json(&self.runs_url(target), &query).await
    }

    async fn count_runs(&self, target: &RepoTarget, status: &str) -> Result<u64> {
        let mut query: Vec<(&str, String)> = vec![
            ("per_page", "1".to_string()),
            ("page", "1".to_string()),
            ("status", status.to_string()),
        ];
        if let Some(event) = &self.event_filter {
            query.push(("event", event.clone()));
        }
        let page: RunsPage = self.get_json(&self.runs_url(target), &query).await?;
        Ok(page.total_count)
    }
}

/// A 403/429 counts as a rate-limit response when the remaining-budget
/// header reads zero or a `Retry-After` is present; a plain 403 is an
/// authorization problem instead.
fn rate_limit_signature(headers: &HeaderMap) -> Option<Option<Duration>> {
    let retry_after = headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs);
    if retry_after.is_some() {
        return Some(retry_after);
    }
    let exhausted = headers
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim() == "0")
        .unwrap_or(false);
    if exhausted {
        Some(None)
    } else {
        None
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let exp = BACKOFF_BASE * 2u32.saturating_pow(attempt.saturating_sub(1));
    let jitter = rand::thread_rng().gen_range(0..=BACKOFF_JITTER_MS);
    exp + Duration::from_millis(jitter)
}

fn truncate(message: &str) -> String {
    const MAX: usize = 200;
    if message.len() <= MAX {
        message.to_string()
    } else {
        let head: String = message.chars().take(MAX).collect();
        format!("{head}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn backoff_grows_with_attempts_and_stays_bounded() {
        for attempt in 1..=4 {
            let delay = backoff_delay(attempt);
            let floor = BACKOFF_BASE * 2u32.pow(attempt - 1);
            assert!(delay >= floor, "attempt {attempt}: {delay:?} < {floor:?}");
            assert!(delay <= floor + Duration::from_millis(BACKOFF_JITTER_MS));
        }
    }

    #[test]
    fn retry_after_header_is_a_rate_limit_signature() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("30"));
        assert_eq!(
            rate_limit_signature(&headers),
            Some(Some(Duration::from_secs(30)))
        );
    }

    #[test]
    fn exhausted_remaining_is_a_rate_limit_signature() {
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
        assert_eq!(rate_limit_signature(&headers), Some(None));
    }

    #[test]
    fn plain_forbidden_has_no_signature() {
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-remaining", HeaderValue::from_static("4999"));
        assert_eq!(rate_limit_signature(&headers), None);
    }
}
