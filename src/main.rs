mod cache;
mod config;
mod http;
mod logging;
mod network;
mod server;
mod worker;

#[cfg(test)]
mod testing;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use url::Url;

use cache::{CacheStorage, SqliteStorage};
use network::HttpNetwork;
use worker::{ServiceWorker, WorkerMessage};

#[derive(Parser, Debug)]
#[command(name = "biapo-offline")]
#[command(about = "Offline caching proxy for the BIAPO task and event manager")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/biapo-offline/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Application origin to proxy
  #[arg(short, long)]
  origin: Option<Url>,

  /// Keep caches in memory only
  #[arg(long)]
  ephemeral: bool,

  #[command(subcommand)]
  command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Install, activate and serve the proxy (default)
  Serve {
    /// Address to listen on
    #[arg(short, long)]
    listen: Option<SocketAddr>,
  },
  /// Populate the app shell cache and exit
  Install,
  /// Show cache partitions
  Status,
  /// Drop the dynamic cache
  Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let mut config = config::Config::load(args.config.as_deref())?;

  // Override origin if specified on command line
  if let Some(origin) = args.origin {
    config.origin = origin.to_string();
  }

  let _log_guard = logging::init(&config.logging)?;
  if let Some(source) = &config.source {
    tracing::debug!(path = %source.display(), "loaded config");
  }

  let worker_config = Arc::new(config.worker_config()?);

  let storage: Arc<dyn CacheStorage> = if args.ephemeral {
    Arc::new(SqliteStorage::open_in_memory()?)
  } else {
    Arc::new(SqliteStorage::open(config.cache.database.as_deref())?)
  };
  let network = Arc::new(HttpNetwork::new(&worker_config.origin)?);
  let worker = Arc::new(ServiceWorker::new(
    Arc::clone(&worker_config),
    storage,
    network,
  ));

  match args.command.unwrap_or(Command::Serve { listen: None }) {
    Command::Serve { listen } => {
      let addr = listen.unwrap_or(config.listen);
      let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| eyre!("Failed to bind {}: {}", addr, e))?;

      worker.start().await?;
      server::serve(listener, worker).await?;
    }
    Command::Install => {
      let (report, activation) = worker.start().await?;
      for url in &report.cached {
        println!("cached   {}", url);
      }
      for (url, reason) in &report.failed {
        println!("failed   {}  ({})", url, reason);
      }
      if let Some(activation) = activation {
        for name in &activation.deleted {
          println!("deleted  {}", name);
        }
      }
    }
    Command::Status => {
      for (name, entries, current) in worker.partitions()? {
        let marker = if current { "*" } else { " " };
        println!("{} {:<40} {:>6}", marker, name, entries);
      }
    }
    Command::Clear => match worker.handle_message(&WorkerMessage::ClearCache)? {
      Some(reply) => println!("{}", serde_json::to_string(&reply)?),
      None => println!("ok"),
    },
  }

  Ok(())
}
