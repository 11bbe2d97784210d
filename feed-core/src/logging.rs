use crate::config::LoggingConfig;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;
use std::time::{Duration, SystemTime};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

pub const LOG_FILE_NAME: &str = "feed-core.log";

static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Daily-rolling `feed-core.log` plus stderr for whoever runs the batch.
pub fn init_file_and_stderr(log_dir: &Path, cfg: &LoggingConfig) -> anyhow::Result<()> {
  fs::create_dir_all(log_dir)?;
  let removed = prune_rolled_logs(log_dir, cfg.retention_days, SystemTime::now());

  let (file_writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(log_dir, LOG_FILE_NAME));
  let _ = FILE_GUARD.set(guard);

  // RUST_LOG wins over the configured level when set.
  let filter = EnvFilter::try_from_default_env()
    .or_else(|_| EnvFilter::try_new(&cfg.level))
    .unwrap_or_else(|_| EnvFilter::new("info"));

  let file_layer = tracing_subscriber::fmt::layer()
    .with_ansi(false)
    .with_target(true)
    .with_writer(file_writer);

  let stderr_layer = tracing_subscriber::fmt::layer()
    .with_ansi(false)
    .with_target(false)
    .with_writer(std::io::stderr);

  tracing_subscriber::registry()
    .with(filter)
    .with(file_layer)
    .with(stderr_layer)
    .try_init()
    .map_err(|e| anyhow::anyhow!("install tracing subscriber: {e}"))?;

  if removed > 0 {
    tracing::debug!(removed, retention_days = cfg.retention_days, "pruned old log files");
  }
  Ok(())
}

/// Deletes rolled `feed-core.log*` files older than the retention window and
/// returns how many went. Anything else in the directory is left alone.
fn prune_rolled_logs(log_dir: &Path, retention_days: u64, now: SystemTime) -> usize {
  if retention_days == 0 {
    return 0;
  }
  let cutoff = now
    .checked_sub(Duration::from_secs(retention_days.saturating_mul(24 * 60 * 60)))
    .unwrap_or(SystemTime::UNIX_EPOCH);

  let Ok(entries) = fs::read_dir(log_dir) else {
    return 0;
  };

  entries
    .flatten()
    .filter(|entry| is_feed_log(&entry.path()))
    .filter(|entry| {
      entry
        .metadata()
        .and_then(|md| md.modified())
        .map(|modified| modified < cutoff)
        .unwrap_or(false)
    })
    .filter(|entry| fs::remove_file(entry.path()).is_ok())
    .count()
}

fn is_feed_log(path: &Path) -> bool {
  path
    .file_name()
    .and_then(|n| n.to_str())
    .map(|name| {
      name == LOG_FILE_NAME
        || name
          .strip_prefix(LOG_FILE_NAME)
          .is_some_and(|rest| rest.starts_with('.'))
    })
    .unwrap_or(false)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn only_feed_logs_are_recognised() {
    assert!(is_feed_log(Path::new("/var/log/feed-core.log")));
    assert!(is_feed_log(Path::new("feed-core.log.2024-05-01")));
    assert!(!is_feed_log(Path::new("feed-core.logger")));
    assert!(!is_feed_log(Path::new("config.toml")));
  }

  #[test]
  fn pruning_respects_the_window() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("feed-core.log.2024-05-01"), "old").unwrap();
    fs::write(dir.path().join("notes.txt"), "keep").unwrap();

    // Files were just written, so a cutoff in the past keeps them.
    assert_eq!(prune_rolled_logs(dir.path(), 1, SystemTime::now()), 0);
    assert_eq!(prune_rolled_logs(dir.path(), 0, SystemTime::now()), 0);

    let later = SystemTime::now() + Duration::from_secs(3 * 24 * 60 * 60);
    assert_eq!(prune_rolled_logs(dir.path(), 1, later), 1);
    assert!(dir.path().join("notes.txt").exists());
    assert!(!dir.path().join("feed-core.log.2024-05-01").exists());
  }
}
