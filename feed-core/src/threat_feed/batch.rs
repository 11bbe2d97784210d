use super::pipeline::{Collaborators, FeedPipeline, RunReport};
use super::FeedSource;
use crate::error::FeedError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// At most one in-flight run per `source_id`, even across overlapping batches
/// that share the same locks.
#[derive(Default)]
pub struct SourceLocks {
  inner: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SourceLocks {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn run_exclusive<T>(&self, source_id: &str, f: impl FnOnce() -> T) -> T {
    let lock = {
      let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
      Arc::clone(map.entry(source_id.to_string()).or_default())
    };
    let _held = lock.lock().unwrap_or_else(PoisonError::into_inner);
    f()
  }
}

#[derive(Debug, Default)]
pub struct BatchReport {
  /// In configuration order, including feeds rejected before running.
  pub reports: Vec<RunReport>,
  /// Feeds never started because a stop was requested.
  pub cancelled: Vec<String>,
}

impl BatchReport {
  pub fn succeeded(&self) -> usize {
    self.reports.iter().filter(|r| r.succeeded()).count()
  }

  pub fn failed(&self) -> usize {
    self.reports.len() - self.succeeded()
  }

  /// The process fails only when nothing succeeded.
  pub fn exit_ok(&self) -> bool {
    self.succeeded() > 0
  }

  pub fn failures(&self) -> impl Iterator<Item = (&str, &FeedError)> {
    self
      .reports
      .iter()
      .filter_map(|r| r.error.as_ref().map(|e| (r.source_id.as_str(), e)))
  }
}

pub struct BatchRunner<'a> {
  pub deps: &'a Collaborators<'a>,
  pub locks: &'a SourceLocks,
  pub max_parallel: usize,
  pub stop: &'a AtomicBool,
}

impl BatchRunner<'_> {
  pub fn run(&self, sources: &[FeedSource], rejected: Vec<(String, FeedError)>) -> BatchReport {
    let mut report = BatchReport {
      reports: rejected
        .into_iter()
        .map(|(id, e)| {
          tracing::error!(source_id = %id, error = %e, "feed rejected");
          RunReport::rejected(&id, e)
        })
        .collect(),
      cancelled: Vec::new(),
    };

    let workers = self.max_parallel.clamp(1, sources.len().max(1));
    let next = AtomicUsize::new(0);
    let slots: Mutex<Vec<Option<RunReport>>> = Mutex::new(vec![None; sources.len()]);

    tracing::info!(feeds = sources.len(), workers, "batch started");
    std::thread::scope(|scope| {
      for _ in 0..workers {
        scope.spawn(|| loop {
          if self.stop.load(Ordering::SeqCst) {
            break;
          }
          let i = next.fetch_add(1, Ordering::SeqCst);
          let Some(source) = sources.get(i) else {
            break;
          };
          let run = self
            .locks
            .run_exclusive(&source.source_id, || FeedPipeline::new(source, self.deps).run());
          slots.lock().unwrap_or_else(PoisonError::into_inner)[i] = Some(run);
        });
      }
    });

    let slots = slots.into_inner().unwrap_or_else(PoisonError::into_inner);
    for (source, slot) in sources.iter().zip(slots) {
      match slot {
        Some(run) => report.reports.push(run),
        None => report.cancelled.push(source.source_id.clone()),
      }
    }

    for (id, e) in report.failures() {
      tracing::warn!(source_id = %id, kind = e.kind(), error = %e, "feed failed");
    }
    if !report.cancelled.is_empty() {
      tracing::warn!(cancelled = report.cancelled.len(), "batch stopped early");
    }
    tracing::info!(
      succeeded = report.succeeded(),
      failed = report.failed(),
      "batch finished"
    );
    report
  }
}
