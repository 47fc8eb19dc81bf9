use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use reqwest::header::HeaderMap;
use tokio::sync::Mutex;

const RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";
const RATE_LIMIT_RESET: &str = "x-ratelimit-reset";

/// Slack added to every reset wait so the first call after the window
/// opens does not land a second early.
const RESET_SLACK: Duration = Duration::from_secs(1);

/// Fallback wait when the API signals exhaustion without telling us when
/// the window resets.
const DEFAULT_EXHAUSTED_WAIT: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
struct Snapshot {
    remaining: Option<u64>,
    reset_at: Option<DateTime<Utc>>,
}

/// Shared tracker of the GitHub API call budget.
///
/// One value is created at startup and injected into the client; every
/// call site consults it before issuing a request and feeds response
/// headers back into it, so all callers within a cycle serialize their
/// budget decisions through the same mutex.
#[derive(Debug, Default)]
pub struct RateLimitState {
    inner: Mutex<Snapshot>,
}

impl RateLimitState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `x-ratelimit-remaining` / `x-ratelimit-reset` from a
    /// response. Missing headers leave the previous snapshot untouched.
    pub async fn observe_headers(&self, headers: &HeaderMap) {
        let remaining = header_u64(headers, RATE_LIMIT_REMAINING);
        let reset_at = header_u64(headers, RATE_LIMIT_RESET)
            .and_then(|epoch| Utc.timestamp_opt(epoch as i64, 0).single());

        let mut inner = self.inner.lock().await;
        if let Some(remaining) = remaining {
            inner.remaining = Some(remaining);
        }
        if let Some(reset_at) = reset_at {
            inner.reset_at = Some(reset_at);
        }
    }

    /// Marks the budget exhausted after a 403/429 carrying a rate-limit
    /// signature. `retry_after` comes from a `Retry-After` header when
    /// the reset headers are absent.
    pub async fn mark_exhausted(&self, retry_after: Option<Duration>) {
        let mut inner = self.inner.lock().await;
        inner.remaining = Some(0);
        if inner.reset_at.map_or(true, |at| at <= Utc::now()) {
            let wait = retry_after.unwrap_or(DEFAULT_EXHAUSTED_WAIT);
            let wait = chrono::Duration::from_std(wait).unwrap_or_else(|_| chrono::Duration::zero());
            inner.reset_at = Some(Utc::now() + wait);
        }
    }

    /// How long the next call must wait, or `None` when budget remains.
    /// A reset time already in the past clears the exhausted state.
    pub async fn required_wait(&self, now: DateTime<Utc>) -> Option<Duration> {
        let mut inner = self.inner.lock().await;
        if inner.remaining != Some(0) {
            return None;
        }
        match inner.reset_at {
            Some(reset_at) if reset_at > now => {
                let wait = (reset_at - now).to_std().unwrap_or_default();
                Some(wait + RESET_SLACK)
            }
            _ => {
                // The window has rolled over since we last heard from the API.
                inner.remaining = None;
                inner.reset_at = None;
                None
            }
        }
    }
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
}
