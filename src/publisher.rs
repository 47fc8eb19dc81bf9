use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::common::error::{ExporterError, Result};
use crate::config::Config;
use crate::exposition;
use crate::observability;
use crate::observation::Observation;

const IMPORT_PATH: &str = "/api/v1/import/prometheus";
const CONTENT_TYPE: &str = "application/openmetrics-text";
const BACKOFF_BASE: Duration = Duration::from_millis(250);
const BACKOFF_JITTER_MS: u64 = 250;

/// Port the scheduler publishes through, so tests can capture batches
/// without a backend.
#[async_trait]
pub trait ObservationSink: Send + Sync {
    async fn publish(&self, observations: &[Observation]) -> Result<()>;
}

/// Pushes a cycle's batch to VictoriaMetrics' Prometheus import endpoint.
///
/// The whole batch retries with backoff up to the ceiling; a batch that
/// still fails is dropped rather than carried into the next cycle, and
/// re-sending a batch is idempotent because the backend overwrites by
/// label set and timestamp.
pub struct VictoriaPublisher {
    http: reqwest::Client,
    import_url: String,
    max_retries: u32,
}

impl VictoriaPublisher {
    pub fn new(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()?;
        let import_url = format!(
            "{}{}",
            config.victoria_url.as_str().trim_end_matches('/'),
            IMPORT_PATH
        );
        Ok(Self {
            http,
            import_url,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl ObservationSink for VictoriaPublisher {
    async fn publish(&self, observations: &[Observation]) -> Result<()> {
        if observations.is_empty() {
            debug!("nothing to publish this cycle");
            return Ok(());
        }

        let body = exposition::encode(observations);
        let mut attempt: u32 = 0;
        loop {
            let outcome = self
                .http
                .post(&self.import_url)
                .header("Content-Type", CONTENT_TYPE)
                .body(body.clone())
                .send()
                .await;

            let failure = match outcome {
                Ok(response) if response.status().is_success() => {
                    info!(
                        samples = observations.len(),
                        bytes = body.len(),
                        "pushed batch to VictoriaMetrics"
                    );
                    observability::metrics::publish_success(observations.len() as u64);
                    return Ok(());
                }
                Ok(response) => {
                    let status = response.status();
                    let detail = response.text().await.unwrap_or_default();
                    format!("status {status}: {detail}")
                }
                Err(err) => err.to_string(),
            };

            if attempt >= self.max_retries {
                observability::metrics::publish_error();
                return Err(ExporterError::Publish(failure));
            }
            attempt += 1;
            let delay = backoff_delay(attempt);
            warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                failure, "publish failed, retrying batch"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let exp = BACKOFF_BASE * 2u32.saturating_pow(attempt.saturating_sub(1));
    let jitter = rand::thread_rng().gen_range(0..=BACKOFF_JITTER_MS);
    exp + Duration::from_millis(jitter)
}
