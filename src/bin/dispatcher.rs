use anyhow::Context;
use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{error, info};

use metric_collector::config::DispatcherCli;
use metric_collector::dispatcher;
use metric_collector::logging;
use metric_collector::queue::{declare_topology, Channel, RabbitMqChannel};

#[tokio::main]
async fn main() {
    let cli = DispatcherCli::parse();
    logging::init(cli.debug);

    if let Err(e) = run(cli).await {
        error!("{e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: DispatcherCli) -> anyhow::Result<()> {
    let channel = RabbitMqChannel::connect(&cli.broker.rabbitmq_url)
        .await
        .context("error connecting to RabbitMQ")?;

    declare_topology(&channel, true)
        .await
        .context("could not declare queue topology")?;

    let mut rng = match cli.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let sent = dispatcher::run(&channel, &mut rng, cli.count)
        .await
        .context("giving up on publishing")?;
    info!(sent, "done");

    channel.close().await.context("closing broker connection")?;
    Ok(())
}
