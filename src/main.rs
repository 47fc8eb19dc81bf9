use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;

use gha_exporter::collector::Collector;
use gha_exporter::config::Config;
use gha_exporter::github::client::GithubClient;
use gha_exporter::github::rate_limit::RateLimitState;
use gha_exporter::observability;
use gha_exporter::publisher::{ObservationSink, VictoriaPublisher};
use gha_exporter::scheduler::Scheduler;

#[derive(Parser)]
#[command(name = "gha-exporter")]
#[command(about = "GitHub Actions workflow metrics exporter for VictoriaMetrics")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll continuously on the configured interval
    Run {
        /// Walk historical completed runs before entering the poll loop
        #[arg(long)]
        backfill: bool,
    },
    /// Execute a single collection cycle and exit
    Once,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    observability::logging::init_logging(&config.log_dir);
    observability::metrics::init_metrics(config.metrics_addr);

    info!(
        targets = config.targets.len(),
        poll_interval_secs = config.poll_interval.as_secs(),
        "configuration loaded"
    );

    let rate_limit = Arc::new(RateLimitState::new());
    let client = Arc::new(GithubClient::new(&config, rate_limit)?);
    let collector = Collector::new(client, &config);
    let publisher: Arc<dyn ObservationSink> = Arc::new(VictoriaPublisher::new(&config)?);
    let scheduler = Scheduler::new(collector, publisher, &config);

    match cli.command {
        Commands::Run { backfill } => {
            println!(
                "🚀 Polling {} target(s) every {}s...",
                config.targets.len(),
                config.poll_interval.as_secs()
            );
            scheduler.run(backfill).await;
            println!("👋 Exporter stopped");
        }
        Commands::Once => {
            println!("🔄 Running a single collection cycle...");
            let mut scheduler = scheduler;
            scheduler.run_once().await;
            println!("✅ Cycle completed");
        }
    }

    Ok(())
}
