//! One feed, one run: fetch, parse, gate on the content digest, build records,
//! drop duplicates, publish, then persist. Nothing is written before publish
//! succeeds and the checksum is always the last write.

use super::checksum::{self, ChecksumRecord, ChecksumStore};
use super::dedup::{DedupFilter, IndicatorStoreQuery};
use super::fetch::Fetcher;
use super::publish::Publisher;
use super::schema::{FeedSnapshot, IndicatorRecord};
use super::{indicator, parser, store, FeedSource};
use crate::error::FeedError;
use crate::types::{FeedEntry, RawFeedDocument};
use chrono::Utc;
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
  Idle,
  Fetched,
  Parsed,
  ChecksumChecked,
  Skipped,
  Building,
  Deduplicating,
  Emitting,
  Done,
  Failed,
}

impl PipelineState {
  pub fn is_terminal(self) -> bool {
    matches!(self, Self::Skipped | Self::Done | Self::Failed)
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Idle => "idle",
      Self::Fetched => "fetched",
      Self::Parsed => "parsed",
      Self::ChecksumChecked => "checksum-checked",
      Self::Skipped => "skipped",
      Self::Building => "building",
      Self::Deduplicating => "deduplicating",
      Self::Emitting => "emitting",
      Self::Done => "done",
      Self::Failed => "failed",
    }
  }
}

impl fmt::Display for PipelineState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Everything a run talks to. Borrowed so one set can serve a whole batch.
pub struct Collaborators<'a> {
  pub fetcher: &'a dyn Fetcher,
  pub checksums: &'a dyn ChecksumStore,
  pub store: &'a dyn IndicatorStoreQuery,
  pub publisher: &'a dyn Publisher,
  /// Root for per-feed snapshot and metadata files.
  pub data_dir: &'a Path,
}

#[derive(Debug, Clone)]
pub struct RunReport {
  pub source_id: String,
  pub history: Vec<PipelineState>,
  pub extracted: usize,
  pub documents: usize,
  pub duplicates: usize,
  pub emitted: usize,
  pub error: Option<FeedError>,
}

impl RunReport {
  fn new(source_id: &str) -> Self {
    Self {
      source_id: source_id.to_string(),
      history: vec![PipelineState::Idle],
      extracted: 0,
      documents: 0,
      duplicates: 0,
      emitted: 0,
      error: None,
    }
  }

  pub fn state(&self) -> PipelineState {
    self.history.last().copied().unwrap_or(PipelineState::Idle)
  }

  /// `Skipped` counts: an unchanged feed is a successful run.
  pub fn succeeded(&self) -> bool {
    matches!(self.state(), PipelineState::Done | PipelineState::Skipped)
  }

  /// Failure report for a run that never started, e.g. a bad config entry.
  pub fn rejected(source_id: &str, error: FeedError) -> Self {
    let mut report = Self::new(source_id);
    report.history.push(PipelineState::Failed);
    report.error = Some(error);
    report
  }
}

pub struct FeedPipeline<'a> {
  source: &'a FeedSource,
  deps: &'a Collaborators<'a>,
  report: RunReport,
}

impl<'a> FeedPipeline<'a> {
  pub fn new(source: &'a FeedSource, deps: &'a Collaborators<'a>) -> Self {
    Self {
      source,
      deps,
      report: RunReport::new(&source.source_id),
    }
  }

  pub fn run(mut self) -> RunReport {
    let span = tracing::info_span!("feed", source_id = %self.source.source_id);
    let _enter = span.enter();

    if let Err(e) = self.drive() {
      tracing::warn!(state = %self.report.state(), kind = e.kind(), error = %e, "feed run failed");
      self.transition(PipelineState::Failed);
      self.report.error = Some(e);
    }
    self.report
  }

  fn transition(&mut self, next: PipelineState) {
    tracing::debug!(from = %self.report.state(), to = %next, "pipeline transition");
    self.report.history.push(next);
  }

  fn drive(&mut self) -> Result<(), FeedError> {
    let source = self.source;
    let deps = self.deps;

    let raw = RawFeedDocument::new(&source.source_id, fetch_content(deps.fetcher, source)?);
    tracing::debug!(bytes = raw.content.len(), "feed fetched");
    self.transition(PipelineState::Fetched);

    let entries: Vec<FeedEntry> = parser::parse(&raw.content, &source.rule)?.collect();
    let context = parser::context_lines(&raw.content)?;
    self.transition(PipelineState::Parsed);

    let previous = deps.checksums.read(&source.source_id)?;
    let verdict = checksum::has_changed(&raw.content, previous.as_deref());
    self.transition(PipelineState::ChecksumChecked);
    if !verdict.changed {
      tracing::info!("feed unchanged since last run");
      self.transition(PipelineState::Skipped);
      return Ok(());
    }

    self.transition(PipelineState::Building);
    let ctx = source.context();
    let now = Utc::now();
    let mut documents = Vec::new();
    let mut built = Vec::new();
    for entry in entries {
      match entry {
        FeedEntry::Ioc(ioc) => built.push(indicator::build(&ioc, &ctx, now)),
        FeedEntry::Document(doc) => documents.push(doc),
      }
    }
    self.report.extracted = built.len();
    self.report.documents = documents.len();

    self.transition(PipelineState::Deduplicating);
    let fresh = self.deduplicate(built)?;

    self.transition(PipelineState::Emitting);
    if fresh.is_empty() {
      tracing::info!(duplicates = self.report.duplicates, "nothing new to publish");
    } else {
      deps.publisher.publish(&fresh)?;
      tracing::info!(emitted = fresh.len(), duplicates = self.report.duplicates, "indicators published");
    }
    self.report.emitted = fresh.len();

    let mut ioc_list = documents;
    ioc_list.extend(fresh.iter().map(|r| serde_json::Value::String(r.name.clone())));
    let snapshot = FeedSnapshot {
      ioc_list,
      threat_feed_context_details: context,
      indicators: fresh,
    };
    store::write_snapshot(deps.data_dir, &source.source_id, &snapshot)?;
    store::write_metadata(deps.data_dir, &source.source_id, &source.metadata(raw.fetched_at))?;
    deps.checksums.write(&ChecksumRecord {
      source_id: source.source_id.clone(),
      digest: verdict.new_digest,
    })?;

    self.transition(PipelineState::Done);
    Ok(())
  }

  fn deduplicate(&mut self, built: Vec<IndicatorRecord>) -> Result<Vec<IndicatorRecord>, FeedError> {
    let mut filter = DedupFilter::new(self.deps.store);
    let mut fresh = Vec::with_capacity(built.len());
    for record in built {
      if filter.admit(&record)? {
        fresh.push(record);
      }
    }
    self.report.duplicates = filter.duplicates;
    Ok(fresh)
  }
}

/// Body of a single-URL feed as served. With extra URLs every body must be
/// JSON, and the feed content becomes the array of them in URL order.
fn fetch_content(fetcher: &dyn Fetcher, source: &FeedSource) -> Result<Vec<u8>, FeedError> {
  let first = fetcher.fetch(&source.url)?;
  if source.extra_urls.is_empty() {
    return Ok(first);
  }

  let mut documents = Vec::with_capacity(source.extra_urls.len() + 1);
  for (url, body) in std::iter::once((&source.url, Ok(first)))
    .chain(source.extra_urls.iter().map(|url| (url, fetcher.fetch(url))))
  {
    let body = body?;
    let doc: serde_json::Value = serde_json::from_slice(&body)
      .map_err(|e| FeedError::Decode(format!("invalid JSON from {url}: {e}")))?;
    documents.push(doc);
  }
  tracing::debug!(documents = documents.len(), "merged multi-url feed");
  serde_json::to_vec(&documents).map_err(|e| FeedError::Decode(e.to_string()))
}

#[cfg(test)]
pub(crate) mod testing {
  use super::*;
  use crate::threat_feed::dedup::StoredIndicator;
  use crate::threat_feed::rules::FeedFormatRule;
  use std::collections::{HashMap, HashSet};
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Mutex;

  pub fn source(id: &str, rule: FeedFormatRule) -> FeedSource {
    FeedSource {
      source_id: id.to_string(),
      url: format!("https://feeds.example/{id}.txt"),
      extra_urls: Vec::new(),
      display_name: id.to_string(),
      reference_url: "https://feeds.example/".to_string(),
      description: "test feed".to_string(),
      feed_type: "ip".to_string(),
      tags: vec!["test".to_string()],
      confidence: None,
      indicator_source: id.to_string(),
      rule,
    }
  }

  /// Serves canned bodies by URL; unknown URLs fail like a dead host.
  #[derive(Default)]
  pub struct StaticFetcher {
    pub bodies: Mutex<HashMap<String, Vec<u8>>>,
    pub calls: AtomicUsize,
  }

  impl StaticFetcher {
    pub fn serve(&self, url: &str, body: &str) {
      self.bodies.lock().unwrap().insert(url.to_string(), body.as_bytes().to_vec());
    }
  }

  impl Fetcher for StaticFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FeedError> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      self
        .bodies
        .lock()
        .unwrap()
        .get(url)
        .cloned()
        .ok_or_else(|| FeedError::fetch(url, None, "connection refused"))
    }
  }

  #[derive(Default)]
  pub struct MemoryChecksums {
    pub digests: Mutex<HashMap<String, String>>,
    pub writes: AtomicUsize,
  }

  impl ChecksumStore for MemoryChecksums {
    fn read(&self, source_id: &str) -> Result<Option<String>, FeedError> {
      Ok(self.digests.lock().unwrap().get(source_id).cloned())
    }

    fn write(&self, record: &ChecksumRecord) -> Result<(), FeedError> {
      self.writes.fetch_add(1, Ordering::SeqCst);
      self
        .digests
        .lock()
        .unwrap()
        .insert(record.source_id.clone(), record.digest.clone());
      Ok(())
    }
  }

  /// Query and publish side of an in-memory store.
  #[derive(Default)]
  pub struct MemoryIndex {
    pub known: Mutex<HashSet<String>>,
    pub batches: Mutex<Vec<Vec<String>>>,
    pub store_down: bool,
    pub publish_down: bool,
  }

  impl IndicatorStoreQuery for MemoryIndex {
    fn find_by_name(&self, value: &str) -> Result<Option<StoredIndicator>, FeedError> {
      if self.store_down {
        return Err(FeedError::StoreUnavailable("search endpoint unreachable".to_string()));
      }
      Ok(self.known.lock().unwrap().contains(value).then(|| StoredIndicator {
        name: value.to_string(),
        id: None,
        x_ioc_type: None,
      }))
    }
  }

  impl Publisher for MemoryIndex {
    fn publish(&self, batch: &[IndicatorRecord]) -> Result<(), FeedError> {
      if self.publish_down {
        return Err(FeedError::StoreUnavailable("publish returned 502".to_string()));
      }
      let names: Vec<String> = batch.iter().map(|r| r.name.clone()).collect();
      self.known.lock().unwrap().extend(names.iter().cloned());
      self.batches.lock().unwrap().push(names);
      Ok(())
    }
  }
}

#[cfg(test)]
mod tests {
  use super::testing::*;
  use super::*;
  use crate::paths;
  use crate::threat_feed::rules::FeedFormatRule;
  use crate::types::IndicatorType;
  use std::sync::atomic::Ordering;

  const IPSUM: &str = "# IPsum\n192.0.2.1\t5\n192.0.2.2\t4\n192.0.2.3\t3\n";

  struct Harness {
    dir: tempfile::TempDir,
    fetcher: StaticFetcher,
    checksums: MemoryChecksums,
    index: MemoryIndex,
  }

  impl Harness {
    fn new() -> Self {
      Self {
        dir: tempfile::tempdir().unwrap(),
        fetcher: StaticFetcher::default(),
        checksums: MemoryChecksums::default(),
        index: MemoryIndex::default(),
      }
    }

    fn run(&self, source: &FeedSource) -> RunReport {
      let deps = Collaborators {
        fetcher: &self.fetcher,
        checksums: &self.checksums,
        store: &self.index,
        publisher: &self.index,
        data_dir: self.dir.path(),
      };
      FeedPipeline::new(source, &deps).run()
    }

    fn published(&self) -> Vec<Vec<String>> {
      self.index.batches.lock().unwrap().clone()
    }
  }

  fn ipsum(h: &Harness) -> FeedSource {
    let src = source("ipsum_level3", FeedFormatRule::hash_strip());
    h.fetcher.serve(&src.url, IPSUM);
    src
  }

  #[test]
  fn changed_feed_runs_to_done_and_persists() {
    let h = Harness::new();
    let src = ipsum(&h);

    let report = h.run(&src);
    assert_eq!(
      report.history,
      vec![
        PipelineState::Idle,
        PipelineState::Fetched,
        PipelineState::Parsed,
        PipelineState::ChecksumChecked,
        PipelineState::Building,
        PipelineState::Deduplicating,
        PipelineState::Emitting,
        PipelineState::Done,
      ]
    );
    assert!(report.succeeded());
    assert_eq!(report.emitted, 3);
    assert_eq!(h.published(), vec![vec!["192.0.2.1", "192.0.2.2", "192.0.2.3"]]);
    assert_eq!(
      h.checksums.read("ipsum_level3").unwrap(),
      Some(checksum::digest(IPSUM.as_bytes()))
    );
    assert!(paths::feed_snapshot_path(h.dir.path(), "ipsum_level3").exists());
    assert!(store::read_metadata(h.dir.path(), "ipsum_level3").is_some());
  }

  #[test]
  fn unchanged_feed_is_skipped_without_side_effects() {
    let h = Harness::new();
    let src = ipsum(&h);
    assert!(h.run(&src).succeeded());
    let writes = h.checksums.writes.load(Ordering::SeqCst);

    let second = h.run(&src);
    assert_eq!(second.state(), PipelineState::Skipped);
    assert!(second.state().is_terminal());
    assert!(second.succeeded());
    assert_eq!(second.emitted, 0);
    assert_eq!(h.published().len(), 1);
    assert_eq!(h.checksums.writes.load(Ordering::SeqCst), writes);
  }

  #[test]
  fn known_indicators_are_dropped_and_the_rest_emitted() {
    let h = Harness::new();
    let src = ipsum(&h);
    h.index.known.lock().unwrap().insert("192.0.2.2".to_string());

    let report = h.run(&src);
    assert_eq!(report.state(), PipelineState::Done);
    assert_eq!(report.duplicates, 1);
    assert_eq!(h.published(), vec![vec!["192.0.2.1", "192.0.2.3"]]);
  }

  #[test]
  fn fetch_failure_fails_without_checksum_write() {
    let h = Harness::new();
    let src = source("dead_feed", FeedFormatRule::hash_strip());

    let report = h.run(&src);
    assert_eq!(report.history, vec![PipelineState::Idle, PipelineState::Failed]);
    assert!(matches!(report.error, Some(FeedError::Fetch { .. })));
    assert_eq!(h.checksums.writes.load(Ordering::SeqCst), 0);
    assert!(!paths::feed_dir(h.dir.path(), "dead_feed").exists());
  }

  #[test]
  fn store_outage_fails_closed_and_keeps_old_checksum() {
    let mut h = Harness::new();
    h.index.store_down = true;
    let src = ipsum(&h);

    let report = h.run(&src);
    assert_eq!(report.state(), PipelineState::Failed);
    assert!(report.history.contains(&PipelineState::Deduplicating));
    assert!(!report.history.contains(&PipelineState::Emitting));
    assert!(matches!(report.error, Some(FeedError::StoreUnavailable(_))));
    assert!(h.published().is_empty());
    assert_eq!(h.checksums.read("ipsum_level3").unwrap(), None);
  }

  #[test]
  fn publish_failure_keeps_the_feed_marked_changed() {
    let mut h = Harness::new();
    h.index.publish_down = true;
    let src = ipsum(&h);

    let report = h.run(&src);
    assert_eq!(report.state(), PipelineState::Failed);
    assert_eq!(h.checksums.writes.load(Ordering::SeqCst), 0);
    assert!(store::read_metadata(h.dir.path(), "ipsum_level3").is_none());

    h.index.publish_down = false;
    assert_eq!(h.run(&src).state(), PipelineState::Done);
  }

  #[test]
  fn invalid_utf8_fails_at_parse() {
    let h = Harness::new();
    let src = source("binary_feed", FeedFormatRule::hash_strip());
    h.fetcher
      .bodies
      .lock()
      .unwrap()
      .insert(src.url.clone(), vec![0x31, 0xff, 0xfe, 0x0a]);

    let report = h.run(&src);
    assert_eq!(
      report.history,
      vec![PipelineState::Idle, PipelineState::Fetched, PipelineState::Failed]
    );
    assert!(matches!(report.error, Some(FeedError::Decode(_))));
  }

  #[test]
  fn all_duplicate_batch_skips_publish_but_advances_checksum() {
    let h = Harness::new();
    let src = ipsum(&h);
    h.index
      .known
      .lock()
      .unwrap()
      .extend(["192.0.2.1", "192.0.2.2", "192.0.2.3"].map(String::from));

    let report = h.run(&src);
    assert_eq!(report.state(), PipelineState::Done);
    assert_eq!(report.emitted, 0);
    assert!(h.published().is_empty());
    assert!(h.checksums.read("ipsum_level3").unwrap().is_some());
  }

  #[test]
  fn json_documents_go_to_the_snapshot_only() {
    let h = Harness::new();
    let src = source("feodo_json", FeedFormatRule::json_document());
    h.fetcher
      .serve(&src.url, r#"[{"ip_address":"192.0.2.50","port":443,"status":"online"}]"#);

    let report = h.run(&src);
    assert_eq!(report.state(), PipelineState::Done);
    assert_eq!(report.documents, 1);
    assert!(h.published().is_empty());

    let bytes = std::fs::read(paths::feed_snapshot_path(h.dir.path(), "feodo_json")).unwrap();
    let snapshot: FeedSnapshot = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(snapshot.ioc_list[0][0]["ip_address"], "192.0.2.50");
    assert!(snapshot.indicators.is_empty());
  }

  #[test]
  fn multi_url_feed_is_one_document_with_one_checksum() {
    let h = Harness::new();
    let mut src = source("unit42", FeedFormatRule::json_document());
    src.url = "https://feeds.example/unit42/a.json".to_string();
    src.extra_urls = vec!["https://feeds.example/unit42/b.json".to_string()];
    h.fetcher.serve(&src.url, r#"{"name":"a","indicators":["192.0.2.7"]}"#);
    h.fetcher.serve(&src.extra_urls[0], r#"{"name":"b"}"#);

    let report = h.run(&src);
    assert_eq!(report.state(), PipelineState::Done);
    assert_eq!(report.documents, 1);
    assert_eq!(h.fetcher.calls.load(Ordering::SeqCst), 2);
    assert_eq!(h.checksums.writes.load(Ordering::SeqCst), 1);

    let bytes = std::fs::read(paths::feed_snapshot_path(h.dir.path(), "unit42")).unwrap();
    let snapshot: FeedSnapshot = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(snapshot.ioc_list[0][0]["name"], "a");
    assert_eq!(snapshot.ioc_list[0][1]["name"], "b");

    assert_eq!(h.run(&src).state(), PipelineState::Skipped);
  }

  #[test]
  fn multi_url_feed_fails_whole_when_one_url_is_down() {
    let h = Harness::new();
    let mut src = source("unit42", FeedFormatRule::json_document());
    src.extra_urls = vec!["https://feeds.example/unit42/missing.json".to_string()];
    h.fetcher.serve(&src.url, r#"{"name":"a"}"#);

    let report = h.run(&src);
    assert_eq!(report.state(), PipelineState::Failed);
    assert!(matches!(report.error, Some(FeedError::Fetch { .. })));
    assert_eq!(h.checksums.writes.load(Ordering::SeqCst), 0);
    assert!(!paths::feed_snapshot_path(h.dir.path(), "unit42").exists());
  }

  #[test]
  fn records_carry_feed_context() {
    let h = Harness::new();
    let mut src = source("c2_list", FeedFormatRule::hash_strip());
    src.display_name = "C2 list".to_string();
    src.confidence = Some(61);
    h.fetcher.serve(&src.url, "d41d8cd98f00b204e9800998ecf8427e\n");

    assert_eq!(h.run(&src).state(), PipelineState::Done);
    let bytes = std::fs::read(paths::feed_snapshot_path(h.dir.path(), "c2_list")).unwrap();
    let snapshot: FeedSnapshot = serde_json::from_slice(&bytes).unwrap();
    let rec = &snapshot.indicators[0];
    assert_eq!(rec.x_ioc_type, IndicatorType::FileHashMd5.canonical());
    assert_eq!(rec.confidence, Some(61));
    assert_eq!(rec.labels[1], "C2 list");
  }
}
