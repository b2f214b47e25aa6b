use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use embr::config::Config;
use embr::hn::HnClient;
use embr::hydrator::TreeHydrator;
use embr::scheduler::{RefreshScheduler, ResponseCache};
use embr::server::{self, AppState};
use embr::store::ItemStore;

#[derive(Parser, Debug)]
#[command(name = "embr")]
#[command(about = "Offline-capable Hacker News reader server")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/embr/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Address to serve on
  #[arg(short, long, env = "EMBR_BIND")]
  bind: Option<SocketAddr>,

  /// Store snapshot file location
  #[arg(short, long, env = "EMBR_SNAPSHOT")]
  snapshot: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("embr=info")),
    )
    .init();

  let args = Args::parse();

  // Load configuration, with CLI/env flags taking precedence
  let mut config = Config::load(args.config.as_deref())?;
  if let Some(bind) = args.bind {
    config.bind = bind;
  }
  if let Some(snapshot) = args.snapshot {
    config.snapshot_path = Some(snapshot);
  }

  let store = Arc::new(ItemStore::open(
    config.snapshot_path()?,
    config.refresh.stale_ratio,
  ));
  let client = Arc::new(HnClient::new(&config.api)?);
  let hydrator = Arc::new(TreeHydrator::new(
    Arc::clone(&store),
    Arc::clone(&client),
    config.refresh.fetch_concurrency,
  ));
  let cache = Arc::new(ResponseCache::new());

  let scheduler = Arc::new(RefreshScheduler::new(
    Arc::clone(&store),
    Arc::clone(&client),
    Arc::clone(&hydrator),
    Arc::clone(&cache),
    config.refresh.clone(),
  ));
  let (shutdown_tx, shutdown_rx) = watch::channel(false);
  let scheduler_task = scheduler.spawn(shutdown_rx);

  let state = AppState {
    store,
    client,
    hydrator,
    cache,
  };
  let mut server_task = tokio::spawn(server::start_server(config.bind, state));

  tokio::select! {
    result = &mut server_task => {
      result.map_err(|e| eyre!("Server task failed: {}", e))??;
    }
    _ = tokio::signal::ctrl_c() => {
      tracing::info!("Shutdown signal received, stopping");
      let _ = shutdown_tx.send(true);
      let _ = scheduler_task.await;
      server_task.abort();
    }
  }

  Ok(())
}
