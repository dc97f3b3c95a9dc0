mod cache;
mod config;
mod manifest;
mod worker;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use url::Url;

use cache::{CacheStorage, SqliteStorage};
use worker::{CacheController, HttpFetcher, WorkerHost, WorkerState};

#[derive(Parser, Debug)]
#[command(name = "precache")]
#[command(about = "Cache-first asset pre-caching worker for static sites")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./precache.yaml or $XDG_CONFIG_HOME/precache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Install the configured manifest and activate the new generation
  Install,
  /// Serve one request cache-first, falling through to the network
  Fetch {
    /// Site-relative path or absolute URL to fetch
    path: String,

    /// Write the response body to this file
    #[arg(short, long)]
    output: Option<PathBuf>,
  },
  /// List cache store generations and their entry counts
  Stores,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("precache=info")))
    .with_writer(std::io::stderr)
    .init();

  let args = Args::parse();
  let config = config::Config::load(args.config.as_deref())?;

  let storage = match &config.storage.path {
    Some(path) => SqliteStorage::open_at(path)?,
    None => SqliteStorage::open()?,
  };
  let storage = Arc::new(storage);

  match args.command {
    Command::Install => install(&config, storage).await,
    Command::Fetch { path, output } => fetch(&config, storage, &path, output.as_deref()).await,
    Command::Stores => stores(storage),
  }
}

fn build_host(
  config: &config::Config,
  storage: Arc<SqliteStorage>,
) -> Result<WorkerHost<SqliteStorage, HttpFetcher>> {
  let origin = config.origin_url()?;
  let manifest = config.manifest()?;
  debug!("manifest has {} entries", manifest.len());
  let manifest = manifest.resolve(&origin)?;
  let network = HttpFetcher::new(config.fetch_timeout())?;

  let controller = CacheController::new(storage, network, config.identity(), manifest);
  Ok(WorkerHost::new(controller))
}

async fn install(config: &config::Config, storage: Arc<SqliteStorage>) -> Result<()> {
  let mut host = build_host(config, Arc::clone(&storage))?;
  host.start().await?;

  if host.state() != WorkerState::Active {
    return Err(eyre!("Worker ended in state {:?}", host.state()));
  }
  let active = host
    .active_store()
    .ok_or_else(|| eyre!("Worker did not reach an active store"))?;
  println!("active generation: {}", active);

  for name in storage.store_names()? {
    let count = storage.entry_count(&name)?.unwrap_or(0);
    println!("  {} ({} assets)", name, count);
  }

  Ok(())
}

async fn fetch(
  config: &config::Config,
  storage: Arc<SqliteStorage>,
  path: &str,
  output: Option<&std::path::Path>,
) -> Result<()> {
  let request = resolve_request(config, path)?;

  let mut host = build_host(config, storage)?;
  host.resume()?;

  let served = host.handle_fetch(&request).await?;
  println!(
    "{} {} {} bytes ({})",
    served.asset.status,
    request,
    served.asset.body.len(),
    served.source
  );

  if let Some(path) = output {
    std::fs::write(path, &served.asset.body)
      .map_err(|e| eyre!("Failed to write {}: {}", path.display(), e))?;
    info!("wrote body to {}", path.display());
  }

  Ok(())
}

fn stores(storage: Arc<SqliteStorage>) -> Result<()> {
  let names = storage.store_names()?;
  if names.is_empty() {
    println!("no cache stores");
    return Ok(());
  }

  for name in names {
    let count = storage.entry_count(&name)?.unwrap_or(0);
    println!("{} ({} assets)", name, count);
  }

  Ok(())
}

/// Resolve a request argument: absolute URLs pass through, anything else is
/// treated as a path on the configured origin.
fn resolve_request(config: &config::Config, path: &str) -> Result<Url> {
  if path.starts_with("http://") || path.starts_with("https://") {
    return Url::parse(path).map_err(|e| eyre!("Invalid request URL {}: {}", path, e));
  }

  let origin = config.origin_url()?;
  origin
    .join(path)
    .map_err(|e| eyre!("Invalid request path {}: {}", path, e))
}
