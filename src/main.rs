use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::io::Write;
use std::path::PathBuf;
use tracing::{info, warn};

use asset_cache::cache::SqliteStorage;
use asset_cache::config::Config;
use asset_cache::logging;
use asset_cache::net::{AssetRequest, HttpFetcher};
use asset_cache::worker::{AssetCacheManager, HostMessage};

type Manager = AssetCacheManager<SqliteStorage, HttpFetcher>;

#[derive(Parser, Debug)]
#[command(name = "asset-cache")]
#[command(about = "An offline asset cache with two-phase population and network fallback")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./asset-cache.yaml or $XDG_CONFIG_HOME/asset-cache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Cache database path, overriding the config file
  #[arg(long)]
  database: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Cache the shell assets, then take over unless older pages must close first
  Install {
    /// Also cache the content list
    #[arg(long)]
    content: bool,
  },
  /// Delete stale stores and make this version current
  Activate,
  /// Cache the content list (same as the CACHE_MUSIC message)
  CacheContent,
  /// Dispatch a host message, e.g. '{"type":"SKIP_WAITING"}'
  Message { json: String },
  /// Resolve one request through the cache
  Get {
    url: String,
    #[arg(short, long, default_value = "GET")]
    method: String,
    /// Write the body here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
  },
  /// List stores and their entries
  Stores {
    /// Print every cached request, not just counts
    #[arg(short, long)]
    verbose: bool,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  let _log_guard = logging::init(config.log_dir.as_deref())?;

  let database = match args.database {
    Some(path) => path,
    None => config.database_path()?,
  };
  let storage = SqliteStorage::open(&database)?;
  let fetcher = HttpFetcher::new(config.fetch_timeout())?;
  let manager = AssetCacheManager::new(&config, storage, fetcher)?;

  let result = run(&manager, args.command).await;

  // Let background revalidations land before exiting
  manager.settle().await;
  result
}

async fn run(manager: &Manager, command: Command) -> Result<()> {
  match command {
    Command::Activate => {
      manager.activate().await?;
    }
    Command::Install { content } => {
      manager.install().await?;
      if manager.ready_to_activate() {
        manager.activate().await?;
      } else {
        info!(state = %manager.state(), "Installed version is waiting for older pages to close");
      }
      if content {
        manager.handle_message(HostMessage::CacheContent).await?;
      }
    }
    Command::CacheContent => {
      manager.handle_message(HostMessage::CacheContent).await?;
    }
    Command::Message { json } => {
      let message = HostMessage::from_json(&json)?;
      if message == HostMessage::Unknown {
        warn!(message = %json, "Unknown message type");
      }
      manager.handle_message(message).await?;
    }
    Command::Get {
      url,
      method,
      output,
    } => {
      let request = AssetRequest::parse(&method, &url, manager.base_url())?;
      let resolved = manager.resolve(&request).await?;

      match resolved.cached_at {
        Some(cached_at) => eprintln!(
          "{} {} from {} (cached {})",
          resolved.response.status,
          request.url,
          resolved.source,
          cached_at.to_rfc3339()
        ),
        None => eprintln!(
          "{} {} from {}",
          resolved.response.status, request.url, resolved.source
        ),
      }

      match output {
        Some(path) => std::fs::write(&path, &resolved.response.body)
          .map_err(|e| eyre!("Failed to write {}: {}", path.display(), e))?,
        None => std::io::stdout()
          .write_all(&resolved.response.body)
          .map_err(|e| eyre!("Failed to write body: {}", e))?,
      }
    }
    Command::Stores { verbose } => {
      for name in manager.store_names()? {
        let keys = manager.cached_keys(&name)?;
        let marker = if name == manager.store_name() { "*" } else { " " };
        println!("{} {} ({} entries)", marker, name, keys.len());
        if verbose {
          for key in keys {
            println!("    {}", key);
          }
        }
      }
    }
  }

  Ok(())
}
