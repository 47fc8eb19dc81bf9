use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::collector::Collector;
use crate::config::Config;
use crate::observability;
use crate::publisher::ObservationSink;

/// Drives the repeating fetch-then-publish cycle.
///
/// A single interval timer with skipped missed ticks guarantees one cycle
/// at a time: a slow cycle eats its own tick instead of overlapping the
/// next one, so rate-limit and dedup state never see concurrent cycles.
pub struct Scheduler {
    collector: Collector,
    sink: Arc<dyn ObservationSink>,
    interval: Duration,
    backfill_count: usize,
}

impl Scheduler {
    pub fn new(collector: Collector, sink: Arc<dyn ObservationSink>, config: &Config) -> Self {
        Self {
            collector,
            sink,
            interval: config.poll_interval,
            backfill_count: config.backfill_count,
        }
    }

    /// Runs until a shutdown signal arrives. An in-flight cycle finishes
    /// collecting and publishing before the loop exits; nothing is
    /// persisted.
    pub async fn run(mut self, backfill: bool) {
        if backfill {
            self.collector
                .backfill(self.sink.as_ref(), self.backfill_count)
                .await;
        }

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_secs = self.interval.as_secs(), "scheduler started");

        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    observability::metrics::heartbeat();
                    self.run_once().await;
                }
                _ = &mut shutdown => {
                    info!("shutdown signal received, exiting");
                    break;
                }
            }
        }
    }

    /// Executes a single collection cycle and publishes its batch.
    /// Publish failures are terminal for the batch, never for the process.
    pub async fn run_once(&mut self) {
        let started = Instant::now();
        let cycle = self.collector.run_cycle().await;
        info!(
            cycle_id = %cycle.id,
            status = ?cycle.status,
            observations = cycle.observations.len(),
            targets = cycle.tallies.len(),
            "collection finished"
        );
        for tally in &cycle.tallies {
            if tally.pages_dropped > 0 || tally.counts_failed > 0 {
                info!(
                    cycle_id = %cycle.id,
                    target = %tally.target,
                    pages_dropped = tally.pages_dropped,
                    counts_failed = tally.counts_failed,
                    "target degraded this cycle"
                );
            }
        }

        if let Err(err) = self.sink.publish(&cycle.observations).await {
            error!(
                cycle_id = %cycle.id,
                %err,
                "batch dropped after exhausting publish retries"
            );
        }
        observability::metrics::cycle_completed(started.elapsed().as_secs_f64());
    }
}
