use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use localcache::cache::{DurableStorage, SqliteStorage};
use localcache::config::Config;
use localcache::entity::parse_id;
use localcache::transport::{HttpTransport, Offline, RemoteTransport};
use localcache::{Application, CacheResult, Collection, Expiry, FetchOptions};
use serde_json::Value;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "localcache")]
#[command(about = "Read JSON resources through a persistent local cache")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/localcache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Application name to use as the cache namespace
  #[arg(short, long)]
  app: Option<String>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Read a resource, from cache when possible
  Fetch {
    resource: String,
    /// Path relative to the remote base URL (default: the resource name)
    #[arg(long)]
    path: Option<String>,
    /// Read a single record with this id from the resource
    #[arg(long)]
    id: Option<String>,
    /// Skip the cache lookup
    #[arg(long)]
    fresh: bool,
    /// Never contact the remote
    #[arg(long)]
    local_only: bool,
    /// Cache the result regardless of defaults
    #[arg(long, conflicts_with = "no_cache")]
    cache: bool,
    /// Do not cache the result
    #[arg(long)]
    no_cache: bool,
    /// Expiration in minutes, or "never"
    #[arg(long)]
    expire: Option<Expiry>,
  },
  /// Print the cached payload of a resource
  Get { resource: String },
  /// Clear one resource, or everything for the application
  Clear { resource: Option<String> },
  /// List cached keys with their expiration
  Keys,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let (writer, _guard) = tracing_appender::non_blocking(std::io::stderr());
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::try_from_env("LOCALCACHE_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
    )
    .with_writer(writer)
    .init();

  let args = Args::parse();

  // Load configuration
  let mut config = Config::load(args.config.as_deref())?;

  // Override app name if specified on command line
  if let Some(name) = args.app {
    config.app.name = name;
  }

  let storage = match &config.storage.path {
    Some(path) => SqliteStorage::open(path)?,
    None => SqliteStorage::open_default()?,
  }
  .with_quota(config.storage.quota_bytes);

  let app = Application::init(&config.app, storage);

  match args.command {
    Command::Fetch {
      resource,
      path,
      id,
      fresh,
      local_only,
      cache,
      no_cache,
      expire,
    } => {
      let mut options = FetchOptions {
        fresh,
        local_only,
        expire_local: expire,
        ..Default::default()
      };
      if cache {
        options = options.cache_local(true);
      } else if no_cache {
        options = options.cache_local(false);
      }

      let mut collection = Collection::new(resource);
      if let Some(path) = path {
        collection = collection.with_url(path);
      }

      // Cache-only reads never reach the remote, so they need no base URL.
      let result = if local_only {
        read(&app, &collection, id.as_deref(), &options, &Offline).await?
      } else {
        let base_url = config
          .remote
          .base_url
          .as_deref()
          .ok_or_else(|| eyre!("remote.base_url is not configured"))?;
        let transport = HttpTransport::new(base_url)?;
        read(&app, &collection, id.as_deref(), &options, &transport).await?
      };

      tracing::info!(source = ?result.source, "read complete");
      print_json(&result.data)?;
    }
    Command::Get { resource } => {
      let entry = app
        .store()
        .get(&resource)
        .ok_or_else(|| eyre!("{} is not cached", resource))?;
      print_json(&entry.payload)?;
    }
    Command::Clear { resource } => match resource {
      Some(resource) => app.store().clear(&resource),
      None => app.store().clear_all(),
    },
    Command::Keys => {
      for (key, expires) in app.store().keys() {
        let expires = expires
          .and_then(chrono::DateTime::<chrono::Utc>::from_timestamp_millis)
          .map(|ts| ts.to_rfc3339())
          .unwrap_or_else(|| "never".to_string());
        println!("{}\t{}", key, expires);
      }
    }
  }

  app.teardown();
  Ok(())
}

/// Read the collection, or one record of it when `id` is given.
async fn read<D: DurableStorage, T: RemoteTransport>(
  app: &Application<D>,
  collection: &Collection,
  id: Option<&str>,
  options: &FetchOptions,
  transport: &T,
) -> Result<CacheResult<Value>> {
  let result = match id {
    Some(id) => {
      let model = collection.model_with_id(parse_id(id));
      app.sync().read(&model, options, transport).await?
    }
    None => app.sync().read(collection, options, transport).await?,
  };
  Ok(result)
}

fn print_json(value: &Value) -> Result<()> {
  let text = serde_json::to_string_pretty(value)?;
  println!("{}", text);
  Ok(())
}
