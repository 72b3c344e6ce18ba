//! Sightline discovery service
//!
//! Runs one discovery pass over every configured connector and publishes
//! the normalized records. Exits non-zero only when startup fails; partial
//! failures during the run are logged and summarized.

mod logging;

use anyhow::Context;
use clap::Parser;
use sightline_discovery::{builtin_registry, DiscoveryConfig, RunCoordinator, RunReport};
use sightline_events::MemoryPublisher;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{info, warn};

/// Identity and resource discovery
#[derive(Debug, Parser)]
#[command(name = "discovery-service")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Service config file
    #[arg(
        long,
        env = "DISCOVERY_CONFIG_PATH",
        default_value = "config/discovery.yml"
    )]
    config: PathBuf,

    /// Capture records in memory and print a summary instead of publishing
    #[arg(long)]
    dry_run: bool,

    /// Watermark for every connector config that does not set its own
    #[arg(long, value_name = "TIMESTAMP")]
    last_run: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is normal outside development.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    logging::init_logging(logging::DEFAULT_LOG_FILTER);

    let mut config = DiscoveryConfig::from_path(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(last_run) = &cli.last_run {
        config.apply_last_run(last_run);
    }

    let dry_run = cli.dry_run || config.publish.dry_run;
    info!(
        config = %cli.config.display(),
        dry_run,
        last_run = cli.last_run.as_deref(),
        "Starting discovery run"
    );

    let coordinator = RunCoordinator::new(builtin_registry());
    let report = if dry_run {
        let mut publisher = MemoryPublisher::new();
        let report = coordinator.run(&config, &mut publisher).await;
        print_dry_run(&publisher);
        report
    } else {
        let mut publisher = broker_publisher()?;
        coordinator.run(&config, publisher.as_mut()).await
    };

    print!("{report}");
    log_outcome(&report);
    Ok(())
}

#[cfg(feature = "kafka")]
fn broker_publisher() -> anyhow::Result<Box<dyn sightline_events::Publisher>> {
    let kafka = sightline_events::KafkaConfig::from_env().context("loading Kafka settings")?;
    Ok(Box::new(sightline_events::KafkaPublisher::new(kafka)))
}

#[cfg(not(feature = "kafka"))]
fn broker_publisher() -> anyhow::Result<Box<dyn sightline_events::Publisher>> {
    anyhow::bail!("built without the `kafka` feature; rerun with --dry-run or rebuild with --features kafka")
}

fn print_dry_run(publisher: &MemoryPublisher) {
    let mut per_topic: BTreeMap<String, usize> = BTreeMap::new();
    for record in publisher.records() {
        *per_topic.entry(record.topic).or_default() += 1;
    }
    println!("dry run, nothing was sent to the broker");
    for (topic, count) in per_topic {
        println!("  {topic}: {count}");
    }
}

fn log_outcome(report: &RunReport) {
    if report.is_clean() {
        info!(published = report.published, "Discovery run finished cleanly");
    } else {
        warn!(
            published = report.published,
            failed_scopes = report.failed_scopes.len(),
            failed_connectors = report.failed_connectors.len(),
            publish_failures = report.publish_failures,
            "Discovery run finished with failures"
        );
    }
}
