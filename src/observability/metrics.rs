//! The exporter's own operational metrics, exposed for scrape.
//!
//! These are distinct from the workflow samples shipped to the backend:
//! they describe how the exporter itself is doing (cycles, retries,
//! dropped pages, publish outcomes) and double as the liveness surface
//! for the hosting orchestrator.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Once;

use tracing::{info, warn};

static INIT: Once = Once::new();

/// Every self-metric name used in the exporter, so no call site carries a
/// magic string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    Heartbeat,
    CyclesCompleted,
    CyclesAborted,
    CycleDuration,
    RunsObserved,
    PagesFetched,
    PagesDropped,
    FetchRetries,
    RateLimitWaitSeconds,
    PublishSuccess,
    PublishError,
    SamplesPublished,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::Heartbeat => "gha_heartbeat_total",
            MetricName::CyclesCompleted => "gha_cycles_completed_total",
            MetricName::CyclesAborted => "gha_cycles_aborted_total",
            MetricName::CycleDuration => "gha_cycle_duration_seconds",
            MetricName::RunsObserved => "gha_runs_observed_total",
            MetricName::PagesFetched => "gha_pages_fetched_total",
            MetricName::PagesDropped => "gha_pages_dropped_total",
            MetricName::FetchRetries => "gha_fetch_retries_total",
            MetricName::RateLimitWaitSeconds => "gha_rate_limit_wait_seconds",
            MetricName::PublishSuccess => "gha_publish_success_total",
            MetricName::PublishError => "gha_publish_error_total",
            MetricName::SamplesPublished => "gha_samples_published_total",
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Installs the Prometheus recorder and its HTTP scrape listener.
///
/// Idempotent; a failure to bind is logged and the process continues
/// without self-metrics rather than dying over observability.
pub fn init_metrics(addr: SocketAddr) {
    INIT.call_once(|| {
        let builder =
            metrics_exporter_prometheus::PrometheusBuilder::new().with_http_listener(addr);
        match builder.install() {
            Ok(()) => {
                info!("Prometheus exporter listening at http://{}/metrics", addr);
                describe_all();
            }
            Err(err) => {
                warn!(%err, "failed to install Prometheus exporter, self-metrics disabled");
            }
        }
    });
}

fn describe_all() {
    use metrics::{describe_counter, describe_histogram};
    describe_counter!(MetricName::Heartbeat.as_str(), "Ticks of the scheduler loop");
    describe_counter!(
        MetricName::CyclesCompleted.as_str(),
        "Collection cycles that ran to completion"
    );
    describe_counter!(
        MetricName::CyclesAborted.as_str(),
        "Collection cycles aborted by an authentication failure"
    );
    describe_histogram!(
        MetricName::CycleDuration.as_str(),
        "Wall-clock duration of a collection cycle"
    );
    describe_counter!(
        MetricName::RunsObserved.as_str(),
        "Workflow runs turned into samples"
    );
    describe_counter!(MetricName::PagesFetched.as_str(), "Listing pages fetched");
    describe_counter!(
        MetricName::PagesDropped.as_str(),
        "Listing pages dropped after exhausting retries"
    );
    describe_counter!(
        MetricName::FetchRetries.as_str(),
        "Retries of transient GitHub API failures"
    );
    describe_histogram!(
        MetricName::RateLimitWaitSeconds.as_str(),
        "Time spent waiting for the GitHub rate limit to reset"
    );
    describe_counter!(
        MetricName::PublishSuccess.as_str(),
        "Batches accepted by the metrics backend"
    );
    describe_counter!(
        MetricName::PublishError.as_str(),
        "Batches dropped after exhausting publish retries"
    );
    describe_counter!(
        MetricName::SamplesPublished.as_str(),
        "Samples delivered to the metrics backend"
    );
}

pub fn heartbeat() {
    metrics::counter!(MetricName::Heartbeat.as_str()).increment(1);
}

pub fn cycle_completed(duration_secs: f64) {
    metrics::counter!(MetricName::CyclesCompleted.as_str()).increment(1);
    metrics::histogram!(MetricName::CycleDuration.as_str()).record(duration_secs);
}

pub fn cycle_aborted() {
    metrics::counter!(MetricName::CyclesAborted.as_str()).increment(1);
}

pub fn runs_observed(count: u64) {
    metrics::counter!(MetricName::RunsObserved.as_str()).increment(count);
}

pub fn page_fetched() {
    metrics::counter!(MetricName::PagesFetched.as_str()).increment(1);
}

pub fn page_dropped() {
    metrics::counter!(MetricName::PagesDropped.as_str()).increment(1);
}

pub fn fetch_retry() {
    metrics::counter!(MetricName::FetchRetries.as_str()).increment(1);
}

pub fn rate_limit_wait(seconds: f64) {
    metrics::histogram!(MetricName::RateLimitWaitSeconds.as_str()).record(seconds);
}

pub fn publish_success(samples: u64) {
    metrics::counter!(MetricName::PublishSuccess.as_str()).increment(1);
    metrics::counter!(MetricName::SamplesPublished.as_str()).increment(samples);
}

pub fn publish_error() {
    metrics::counter!(MetricName::PublishError.as_str()).increment(1);
}
