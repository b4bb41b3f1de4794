//! Controller binary

use anyhow::Context;
use clap::Parser;
use minidfs::{common::prepare_storage_dir, Config, Controller};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "minidfs-controller")]
#[command(about = "minidfs controller: membership, placement and rebalancing")]
#[command(version = minidfs::VERSION)]
struct Cli {
    /// Port for clients and storage peers
    port: Option<u16>,

    /// Replication factor
    replication_factor: Option<usize>,

    /// Peer inactivity timeout in milliseconds
    timeout_ms: Option<u64>,

    /// Seconds between rebalance passes
    rebalance_period_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // File and environment first, positional arguments win
    let mut config = Config::load().context("failed to load configuration")?;
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(replicas) = cli.replication_factor {
        config.replication_factor = replicas;
    }
    if let Some(timeout_ms) = cli.timeout_ms {
        config.timeout_ms = timeout_ms;
    }
    if let Some(period) = cli.rebalance_period_secs {
        config.rebalance_period_secs = period;
    }
    config.validate()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("minidfs {}", minidfs::BUILD_INFO);

    prepare_storage_dir(&config.storage_dir)
        .await
        .with_context(|| format!("failed to prepare {}", config.storage_dir.display()))?;

    let controller = Controller::bind(&config)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr()))?;

    tokio::select! {
        res = controller.serve() => res?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
        }
    }

    Ok(())
}
