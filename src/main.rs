use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{debug, error, info};

use metric_collector::config::WorkerCli;
use metric_collector::metrics::StatsRegistry;
use metric_collector::processors::{spawn_consolidation, ProcessorKind};
use metric_collector::queue::{declare_topology, Channel, RabbitMqChannel};
use metric_collector::store::RedisStore;
use metric_collector::worker::{run_worker, StatsProcessor, StatsSink};
use metric_collector::{logging, server, AppState};

#[tokio::main]
async fn main() {
    // Unknown kinds make clap print usage and exit with status 2
    let cli = WorkerCli::parse();
    logging::init(cli.debug);

    if let Err(e) = run(cli).await {
        error!("{e:#}");
    }
    // Every way out of a worker is fatal
    std::process::exit(1);
}

async fn run(cli: WorkerCli) -> anyhow::Result<()> {
    // ── 1. Store + processor ─────────────────────────────────────
    info!(kind = ?cli.kind, "initializing metric processor");
    debug!(url = %cli.redis_url, "connecting to Redis");
    let store = Arc::new(
        RedisStore::connect(&cli.redis_url)
            .await
            .context("error initializing processor")?,
    );
    let processor = cli.kind.build(store.clone());

    if cli.kind == ProcessorKind::DistinctName {
        spawn_consolidation(store, cli.consolidate_interval());
    }

    // ── 2. Broker + topology ─────────────────────────────────────
    info!("connecting to RabbitMQ");
    let channel = RabbitMqChannel::connect(&cli.broker.rabbitmq_url)
        .await
        .context("error connecting to RabbitMQ")?
        .with_prefetch(cli.max_in_flight);
    declare_topology(&channel, true)
        .await
        .context("could not declare queue topology")?;

    // ── 3. Stats endpoint ────────────────────────────────────────
    let registry = Arc::new(StatsRegistry::new());
    server::spawn(
        cli.stats_addr,
        Arc::new(AppState {
            stats: registry.clone(),
        }),
    );
    let sink: Arc<dyn StatsSink> = registry;
    let processor = Arc::new(StatsProcessor::new(processor, Some(sink)));

    // ── 4. Consume until something fatal happens ─────────────────
    info!(queue = cli.kind.queue(), "starting worker");
    let reason = run_worker(&channel, cli.kind.queue(), processor, cli.worker_config()).await;
    if let Err(e) = channel.close().await {
        debug!(error = %e, "closing broker connection");
    }
    Err(reason).context("worker stopped")
}
