pub mod config;
pub mod console;
pub mod error;
pub mod logging;
pub mod paths;
pub mod threat_feed;
pub mod types;

use anyhow::Context;
use config::{Config, PublishMode};
use error::FeedError;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use threat_feed::api::IndicatorApi;
use threat_feed::batch::{BatchReport, BatchRunner, SourceLocks};
use threat_feed::checksum::FileChecksumStore;
use threat_feed::dedup::IndicatorStoreQuery;
use threat_feed::fetch::{HttpFetcher, RetryPolicy, RetryingFetcher};
use threat_feed::pipeline::Collaborators;
use threat_feed::publish::Publisher;
use threat_feed::store::LocalIndicatorStore;
use threat_feed::FeedSource;

/// Entry point for the binary. Returns whether the process should exit 0.
pub fn run_console(args: &[String]) -> anyhow::Result<bool> {
  let opts = console::parse_args(args)?;
  let base = paths::base_dir()?;
  let cfg = match &opts.config_path {
    Some(path) => config::load(path)?,
    None => config::load_or_create_default(&paths::config_path(&base))?,
  };

  match console::run_console_command(&cfg, &base, &opts) {
    console::ConsoleAction::ExitOk => return Ok(true),
    console::ConsoleAction::RunBatch => {}
  }

  logging::init_file_and_stderr(&paths::logs_dir(&base), &cfg.logging)?;
  tracing::info!(version = env!("CARGO_PKG_VERSION"), base = %base.display(), "feed-core starting");

  let stop = Arc::new(AtomicBool::new(false));
  let ctrlc_stop = Arc::clone(&stop);
  ctrlc::set_handler(move || {
    ctrlc_stop.store(true, Ordering::SeqCst);
  })
  .context("install Ctrl-C handler")?;

  let report = run_batch(&cfg, &base, &opts.only, &stop)?;
  Ok(report.exit_ok())
}

/// Runs every selected feed once. Per-feed failures land in the report;
/// only setup problems (no usable store, no HTTP client) are errors here.
pub fn run_batch(cfg: &Config, base: &Path, only: &[String], stop: &AtomicBool) -> anyhow::Result<BatchReport> {
  let (sources, rejected) = select_feeds(cfg, only);
  if sources.is_empty() {
    tracing::error!(rejected = rejected.len(), "no runnable feeds configured");
  }

  let fetcher = RetryingFetcher::new(HttpFetcher::new(&cfg.fetch)?, RetryPolicy::from_config(&cfg.fetch));
  let checksums = FileChecksumStore::new(base);

  let backend = match cfg.publish.mode {
    PublishMode::Api => Backend::Api(IndicatorApi::from_config(&cfg.publish).context("set up indicator api")?),
    PublishMode::Local => Backend::Local(LocalIndicatorStore::open(&paths::local_index_path(base))?),
  };

  let deps = Collaborators {
    fetcher: &fetcher,
    checksums: &checksums,
    store: backend.store(),
    publisher: backend.publisher(),
    data_dir: base,
  };
  let locks = SourceLocks::new();
  let runner = BatchRunner {
    deps: &deps,
    locks: &locks,
    max_parallel: cfg.batch.max_parallel,
    stop,
  };
  Ok(runner.run(&sources, rejected))
}

enum Backend {
  Api(IndicatorApi),
  Local(LocalIndicatorStore),
}

impl Backend {
  fn store(&self) -> &dyn IndicatorStoreQuery {
    match self {
      Self::Api(api) => api,
      Self::Local(local) => local,
    }
  }

  fn publisher(&self) -> &dyn Publisher {
    match self {
      Self::Api(api) => api,
      Self::Local(local) => local,
    }
  }
}

/// Valid feeds, narrowed to `only` when given. Unknown `only` ids are reported
/// as rejected feeds so a typo cannot pass silently.
fn select_feeds(cfg: &Config, only: &[String]) -> (Vec<FeedSource>, Vec<(String, FeedError)>) {
  let (mut sources, mut rejected) = cfg.resolve_feeds();
  if only.is_empty() {
    return (sources, rejected);
  }

  rejected.retain(|(id, _)| only.contains(id));
  sources.retain(|s| only.contains(&s.source_id));
  for id in only {
    let known = sources.iter().any(|s| &s.source_id == id) || rejected.iter().any(|(r, _)| r == id);
    if !known {
      rejected.push((
        id.clone(),
        FeedError::Configuration(format!("no enabled feed named {id}")),
      ));
    }
  }
  (sources, rejected)
}
