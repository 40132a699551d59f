use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use saorsa_stats::gatherer::{self, ConsoleSink, Gatherer, ResultSink};
use saorsa_stats::transport::tcp::{TcpDialer, serve};
use saorsa_stats::{NodeKey, ProviderConnector, SnapshotStore, StatsConfig, StatsProvider};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "saorsa-stats")]
#[command(about = "Distributed stats provider and gatherer")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Accept providers and poll them
    Gatherer {
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long)]
        listen: Option<SocketAddr>,

        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// e.g. `60s`, `5m`
        #[arg(long, value_parser = humantime_serde::re::humantime::parse_duration)]
        poll_interval: Option<Duration>,

        /// Print results instead of writing the snapshot file
        #[arg(long)]
        console: bool,
    },
    /// Report this node's stats to a gatherer
    Provider {
        #[arg(long)]
        config: Option<PathBuf>,

        /// Comma-separated gatherer addresses, as published in `gatherer.addr`
        #[arg(long)]
        gatherer: Option<String>,

        #[arg(long)]
        nickname: Option<String>,

        #[arg(long)]
        node_key: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    saorsa_stats::logging::init(&cli.log_level)?;

    match cli.command {
        Commands::Gatherer {
            config,
            listen,
            data_dir,
            poll_interval,
            console,
        } => {
            let mut config = StatsConfig::load_or_default(config.as_deref())?.gatherer;
            if let Some(listen) = listen {
                config.listen_addr = listen;
            }
            if let Some(data_dir) = data_dir {
                config.data_dir = data_dir;
            }
            if let Some(interval) = poll_interval {
                config.poll_interval = interval;
            }
            config.validate()?;
            run_gatherer(config, console).await
        }
        Commands::Provider {
            config,
            gatherer,
            nickname,
            node_key,
        } => {
            let mut config = StatsConfig::load_or_default(config.as_deref())?.provider;
            if gatherer.is_some() {
                config.gatherer_addr = gatherer;
            }
            if let Some(nickname) = nickname {
                config.nickname = nickname;
            }
            if let Some(node_key) = node_key {
                config.node_key_file = node_key;
            }
            if config.nickname.is_empty() {
                config.nickname = default_nickname();
            }
            config.validate()?;
            run_provider(config).await
        }
    }
}

async fn run_gatherer(config: saorsa_stats::GathererConfig, console: bool) -> Result<()> {
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("failed to create {}", config.data_dir.display()))?;

    let sink: Arc<dyn ResultSink> = if console {
        Arc::new(ConsoleSink::stdout())
    } else {
        let store = SnapshotStore::open(config.snapshot_path())
            .await
            .context("failed to open snapshot store")?;
        Arc::new(store)
    };

    let bind_addr = gatherer::resolve_listen_addr(&config.data_dir, config.listen_addr);
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    let bound = listener.local_addr()?;
    let location = gatherer::publish_address(&config.data_dir, bound)
        .context("failed to publish gatherer address")?;
    info!(%bound, %location, "stats gatherer listening");

    let gatherer = Arc::new(Gatherer::new(sink, config.poll_interval));
    let scheduler = gatherer.start();

    let result = tokio::select! {
        served = serve(listener, Arc::clone(&gatherer)) => {
            served.context("listener failed")
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
            Ok(())
        }
    };
    scheduler.stop();
    result
}

async fn run_provider(config: saorsa_stats::ProviderConfig) -> Result<()> {
    let Some(gatherer_addr) = config.gatherer_addr.clone() else {
        anyhow::bail!("a gatherer address is required (--gatherer)");
    };

    let key = NodeKey::load_or_generate(&config.node_key_file).with_context(|| {
        format!(
            "failed to load node key {}",
            config.node_key_file.display()
        )
    })?;
    info!(identity = %key.fingerprint(), nickname = %config.nickname, "starting stats provider");

    let provider = StatsProvider::new(&config.load_monitor)?;
    provider.start();

    let connector = ProviderConnector::new(
        Arc::new(TcpDialer::new(Some(key))),
        gatherer_addr,
        config.nickname.clone(),
        provider.registry().clone(),
    );

    let result = tokio::select! {
        ran = connector.run() => match ran {
            Ok(()) => {
                warn!("gatherer closed the connection");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "stats provider stopped");
                Err(e.into())
            }
        },
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
            Ok(())
        }
    };
    provider.stop();
    result
}

fn default_nickname() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "unnamed".to_string())
}
