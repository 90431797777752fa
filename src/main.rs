mod cache;
mod config;
mod event;
mod fetch;
mod worker;

#[cfg(test)]
mod testing;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::cache::{CacheSource, PartitionStore, SqliteStore, VersionRegistry};
use crate::config::Config;
use crate::event::EventLoop;
use crate::fetch::{Destination, HttpFetcher, Method, Request};
use crate::worker::{LifecycleState, ServiceWorker, StdoutSink};

#[derive(Parser, Debug)]
#[command(name = "shellcache")]
#[command(about = "Offline-first request caching with versioned partitions")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/shellcache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Log to stderr instead of the log file
  #[arg(short, long)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Populate the static partition for the configured version
  Install {
    /// Stay in the waiting state instead of taking over immediately
    #[arg(long)]
    no_skip_waiting: bool,
  },
  /// Delete partitions of other versions and take over clients
  Activate,
  /// Send one request through the interceptor and write the body to stdout
  Fetch {
    /// Absolute URL or path relative to the configured origin
    target: String,
    #[arg(short = 'X', long, default_value = "GET")]
    method: Method,
    #[arg(short, long, default_value = "empty")]
    destination: Destination,
    /// Request header as "name: value"
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,
    /// Request body
    #[arg(long)]
    data: Option<String>,
    /// Also print response headers to stderr
    #[arg(short, long)]
    include: bool,
  },
  /// List partitions in the store
  Partitions,
  /// Post a JSON control message, e.g. '{"type":"SKIP_WAITING"}'
  Message { json: String },
  /// Trigger background sync for a tag
  Sync { tag: String },
  /// Deliver a push payload
  Push { payload: Option<String> },
  /// Route a notification click, e.g. `open` or `close`
  Click { action: Option<String> },
}

fn init_logging(verbose: bool) -> Result<Option<WorkerGuard>> {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

  if verbose {
    tracing_subscriber::fmt()
      .with_env_filter(filter)
      .with_writer(std::io::stderr)
      .init();
    return Ok(None);
  }

  let dir = Config::data_dir()?;
  std::fs::create_dir_all(&dir).map_err(|e| eyre!("Failed to create log directory: {}", e))?;
  let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, "shellcache.log"));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(Some(guard))
}

fn describe_source(source: CacheSource) -> &'static str {
  match source {
    CacheSource::Network => "network",
    CacheSource::Cache => "cache",
    CacheSource::Offline => "cache, offline",
    CacheSource::Shell => "shell fallback",
    CacheSource::Passthrough => "not intercepted",
  }
}

fn describe_state(state: LifecycleState) -> &'static str {
  match state {
    LifecycleState::Uninstalled => "uninstalled",
    LifecycleState::Installing => "installing",
    LifecycleState::Waiting => "waiting",
    LifecycleState::Activating => "activating",
    LifecycleState::Active => "active",
  }
}

fn parse_header(raw: &str) -> Result<(String, String)> {
  let (name, value) = raw
    .split_once(':')
    .ok_or_else(|| eyre!("Invalid header '{}', expected 'name: value'", raw))?;
  Ok((name.trim().to_string(), value.trim().to_string()))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = init_logging(args.verbose)?;

  let mut config = Config::load(args.config.as_deref())?;
  if let Command::Install {
    no_skip_waiting: true,
  } = args.command
  {
    config.lifecycle.skip_waiting = false;
  }

  let storage = Arc::new(SqliteStore::open(&config.db_path()?)?);

  if let Command::Partitions = args.command {
    let registry = VersionRegistry::new(&config.cache.prefix, &config.cache.version);
    for name in storage.partitions()? {
      let mark = if registry.contains(&name) { "current" } else { "stale" };
      println!("{}\t{}", name, mark);
    }
    return Ok(());
  }

  let fetcher = Arc::new(HttpFetcher::new(&config.network)?);
  let worker = Arc::new(ServiceWorker::new(
    &config,
    Arc::clone(&storage),
    fetcher,
    Arc::new(StdoutSink),
  )?);
  // A fresh install always repopulates, so only the other commands resume
  if !matches!(args.command, Command::Install { .. }) {
    worker.lifecycle().restore().await?;
  }

  let mut events = EventLoop::new();
  worker.register(&mut events);
  let handle = events.handle();
  tokio::spawn(events.run());

  match args.command {
    Command::Install { .. } => {
      let outcome = handle.install().await?;
      println!("installed {} entries", outcome.entries);
      if let Some(report) = outcome.activation {
        println!(
          "activated: {} deleted, {} failed, {} clients claimed",
          report.deleted.len(),
          report.failed.len(),
          report.claimed
        );
      } else {
        println!("waiting for skip-waiting");
      }
    }
    Command::Activate => {
      let report = handle.activate().await?;
      for name in &report.deleted {
        println!("deleted {}", name);
      }
      for name in &report.failed {
        eprintln!("failed to delete {}", name);
      }
    }
    Command::Fetch {
      target,
      method,
      destination,
      headers,
      data,
      include,
    } => {
      let mut request = Request::new(method, config.resolve(&target)?).with_destination(destination);
      for raw in &headers {
        let (name, value) = parse_header(raw)?;
        request = request.with_header(name, value);
      }
      if let Some(data) = data {
        request = request.with_body(data);
      }

      let result = handle.fetch(request).await?;
      match result.cached_at {
        Some(at) => eprintln!(
          "{} ({}, stored {})",
          result.data.status(),
          describe_source(result.source),
          at.format("%Y-%m-%d %H:%M:%S")
        ),
        None => eprintln!("{} ({})", result.data.status(), describe_source(result.source)),
      }
      if include {
        for (name, value) in result.data.headers() {
          eprintln!("{}: {}", name, value);
        }
      }
      let body = result.data.bytes().await?;
      let mut stdout = tokio::io::stdout();
      stdout.write_all(&body).await?;
      stdout.flush().await?;
    }
    Command::Message { json } => {
      let data = serde_json::from_str(&json).map_err(|e| eyre!("Invalid message JSON: {}", e))?;
      handle.message(data).await?;
      println!("{}", describe_state(worker.lifecycle().state().await));
    }
    Command::Sync { tag } => {
      let ack = handle.sync(&tag).await?;
      println!("{:?}", ack);
    }
    Command::Push { payload } => {
      if !handle.push(payload).await? {
        return Err(eyre!("Notification could not be shown"));
      }
    }
    Command::Click { action } => match handle.notification_click(action).await? {
      Some(id) => println!("opened client {}", id),
      None => println!("no window opened"),
    },
    Command::Partitions => unreachable!("handled before the worker starts"),
  }

  Ok(())
}
