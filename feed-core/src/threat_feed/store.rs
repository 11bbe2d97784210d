use super::dedup::{IndicatorStoreQuery, StoredIndicator};
use super::publish::Publisher;
use super::schema::{FeedMetadata, FeedSnapshot, IndicatorRecord};
use crate::error::FeedError;
use crate::paths;
use anyhow::Context;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub fn atomic_write_file(dst: &Path, bytes: &[u8]) -> anyhow::Result<()> {
  let dir = dst
    .parent()
    .ok_or_else(|| anyhow::anyhow!("destination has no parent directory"))?;
  fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;

  let tmp = tmp_path(dst);
  fs::write(&tmp, bytes).with_context(|| format!("write {}", tmp.display()))?;
  fs::rename(&tmp, dst).with_context(|| format!("rename {} -> {}", tmp.display(), dst.display()))?;
  Ok(())
}

fn tmp_path(dst: &Path) -> PathBuf {
  let name = dst.file_name().and_then(|s| s.to_str()).unwrap_or("tmp");
  dst.with_file_name(format!(".{name}.tmp"))
}

pub fn write_snapshot(base: &Path, source_id: &str, snapshot: &FeedSnapshot) -> Result<(), FeedError> {
  let bytes = serde_json::to_vec_pretty(snapshot).map_err(|e| FeedError::Persist(e.to_string()))?;
  atomic_write_file(&paths::feed_snapshot_path(base, source_id), &bytes)
    .map_err(|e| FeedError::Persist(format!("{e:#}")))
}

pub fn write_metadata(base: &Path, source_id: &str, meta: &FeedMetadata) -> Result<(), FeedError> {
  let bytes = serde_json::to_vec_pretty(meta).map_err(|e| FeedError::Persist(e.to_string()))?;
  atomic_write_file(&paths::feed_metadata_path(base, source_id), &bytes)
    .map_err(|e| FeedError::Persist(format!("{e:#}")))
}

pub fn read_metadata(base: &Path, source_id: &str) -> Option<FeedMetadata> {
  let bytes = fs::read(paths::feed_metadata_path(base, source_id)).ok()?;
  serde_json::from_slice(&bytes).ok()
}

/// File-backed stand-in for the search index: one JSON array of records,
/// looked up by `name`. Used when publishing is configured as `local`.
pub struct LocalIndicatorStore {
  path: PathBuf,
  by_name: Mutex<HashMap<String, IndicatorRecord>>,
}

impl LocalIndicatorStore {
  pub fn open(path: &Path) -> anyhow::Result<Self> {
    let mut by_name = HashMap::new();
    if path.exists() {
      let bytes = fs::read(path).with_context(|| format!("read {}", path.display()))?;
      let records: Vec<IndicatorRecord> =
        serde_json::from_slice(&bytes).with_context(|| format!("parse {}", path.display()))?;
      for rec in records {
        by_name.entry(rec.name.clone()).or_insert(rec);
      }
    }
    tracing::debug!(path = %path.display(), indicators = by_name.len(), "local indicator store opened");
    Ok(Self {
      path: path.to_path_buf(),
      by_name: Mutex::new(by_name),
    })
  }

  pub fn len(&self) -> usize {
    self.by_name.lock().map(|m| m.len()).unwrap_or(0)
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl IndicatorStoreQuery for LocalIndicatorStore {
  fn find_by_name(&self, value: &str) -> Result<Option<StoredIndicator>, FeedError> {
    let map = self
      .by_name
      .lock()
      .map_err(|_| FeedError::StoreUnavailable("local index lock poisoned".to_string()))?;
    Ok(map.get(value).map(StoredIndicator::from))
  }
}

impl Publisher for LocalIndicatorStore {
  fn publish(&self, batch: &[IndicatorRecord]) -> Result<(), FeedError> {
    let mut map = self
      .by_name
      .lock()
      .map_err(|_| FeedError::StoreUnavailable("local index lock poisoned".to_string()))?;

    let mut next = map.clone();
    for rec in batch {
      next.entry(rec.name.clone()).or_insert_with(|| rec.clone());
    }

    let mut records: Vec<&IndicatorRecord> = next.values().collect();
    records.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.name.cmp(&b.name)));
    let bytes = serde_json::to_vec_pretty(&records)
      .map_err(|e| FeedError::StoreUnavailable(format!("encode index: {e}")))?;
    atomic_write_file(&self.path, &bytes)
      .map_err(|e| FeedError::StoreUnavailable(format!("write index: {e:#}")))?;

    *map = next;
    Ok(())
  }
}
