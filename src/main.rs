mod app;
mod cache;
mod classify;
mod config;
mod control;
mod event;
mod net;
mod worker;

use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use url::Url;

use crate::app::Worker;
use crate::cache::{FetchRequest, MemoryStores, ServedFrom, SqliteStores, StoreRegistry};
use crate::control::{ControlReply, CLEAR_CACHE, GET_VERSION};
use crate::net::HttpFetcher;
use crate::worker::{CacheManager, ClientNotice, SUBMISSION_SYNC_TAG};

#[derive(Parser, Debug)]
#[command(name = "offcache")]
#[command(about = "An offline-first HTTP cache worker")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/offcache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// URLs to route through the caching policy after activation
  urls: Vec<String>,

  /// Send a form submission; network failures are queued for replay
  #[arg(long)]
  submit: Option<String>,

  /// Body for --submit
  #[arg(long)]
  body: Option<String>,

  /// Replay queued submissions before exiting
  #[arg(long)]
  sync: bool,

  /// Delete every cache store before exiting
  #[arg(long)]
  clear: bool,

  /// Keep stores in memory instead of the on-disk database
  #[arg(long)]
  ephemeral: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;
  let _guard = init_logging()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;

  if args.ephemeral {
    run(MemoryStores::new(), config, args).await
  } else {
    run(SqliteStores::open()?, config, args).await
  }
}

async fn run<S>(stores: S, config: config::Config, args: Args) -> Result<()>
where
  S: StoreRegistry + 'static,
{
  let stores = Arc::new(stores);
  let fetcher = Arc::new(HttpFetcher::new()?);
  let manager = CacheManager::new(config, Arc::clone(&stores), fetcher)?;

  let (worker, handle) = Worker::new(manager);
  let manager = worker.manager();
  let loop_task = tokio::spawn(worker.run());

  manager.install().await?;
  manager.activate().await?;

  if let Some(ControlReply::Version(version)) = handle.request(GET_VERSION).await? {
    println!("generation: {}", version);
  }

  for raw in &args.urls {
    let url = Url::parse(raw).map_err(|e| eyre!("Invalid URL {}: {}", raw, e))?;
    let request = if looks_like_page(&url) {
      FetchRequest::navigation(url)
    } else {
      FetchRequest::get(url)
    };

    match handle.fetch(request).await {
      Ok(served) => println!(
        "{} {} ({}, {})",
        served.response.status,
        raw,
        source_label(served.served_from),
        served.response.header("content-type").unwrap_or("-")
      ),
      Err(e) => println!("FAIL {}: {}", raw, e),
    }
  }

  if let Some(target) = &args.submit {
    let url = Url::parse(target).map_err(|e| eyre!("Invalid URL {}: {}", target, e))?;
    let mut request = FetchRequest::get(url);
    request.method = "POST".to_string();
    request.headers.push((
      "content-type".to_string(),
      "application/x-www-form-urlencoded".to_string(),
    ));
    request.body = Some(args.body.clone().unwrap_or_default().into_bytes());

    match handle.fetch(request.clone()).await {
      Ok(served) => println!("submitted: {}", served.response.status),
      Err(e) => {
        let id = manager.enqueue_submission(&request)?;
        println!("submission failed ({}), queued as {}", e, &id[..12]);
      }
    }
  }

  let mut notices = manager.subscribe();
  if args.sync {
    handle.sync(SUBMISSION_SYNC_TAG)?;
  }
  if args.clear {
    handle.request(CLEAR_CACHE).await?;
    println!("caches cleared");
  }

  drop(handle);
  loop_task.await??;

  while let Ok(notice) = notices.try_recv() {
    if let ClientNotice::SubmissionReplayed { id } = notice {
      println!("replayed submission {}", &id[..12]);
    }
  }

  let names = stores.list_stores()?;
  for name in &names {
    println!("{}: {} entries", name, stores.keys(name)?.len());
  }
  println!("pending submissions: {}", manager.pending_submissions()?.len());

  Ok(())
}

/// Whether a URL looks like a page navigation rather than a subresource.
fn looks_like_page(url: &Url) -> bool {
  let last = url
    .path_segments()
    .and_then(|mut segments| segments.next_back())
    .unwrap_or("");

  last.is_empty() || !last.contains('.') || last.ends_with(".html")
}

fn source_label(source: ServedFrom) -> &'static str {
  match source {
    ServedFrom::Network => "network",
    ServedFrom::Cache => "cache",
    ServedFrom::Fallback => "fallback",
  }
}

fn init_logging() -> Result<tracing_appender::non_blocking::WorkerGuard> {
  let log_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?
    .join("offcache")
    .join("logs");
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory: {}", e))?;

  let appender = tracing_appender::rolling::daily(log_dir, "offcache.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(guard)
}
