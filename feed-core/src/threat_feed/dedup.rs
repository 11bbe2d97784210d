use super::schema::IndicatorRecord;
use crate::error::FeedError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// The fields dedup needs from whatever the store returns. Stores hold records
/// written by other producers too, so everything but `name` is optional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredIndicator {
  pub name: String,
  #[serde(default)]
  pub id: Option<String>,
  #[serde(default)]
  pub x_ioc_type: Option<String>,
}

impl From<&IndicatorRecord> for StoredIndicator {
  fn from(rec: &IndicatorRecord) -> Self {
    Self {
      name: rec.name.clone(),
      id: Some(rec.id.clone()),
      x_ioc_type: Some(rec.x_ioc_type.clone()),
    }
  }
}

/// Point lookup by indicator value against the shared indicator store.
pub trait IndicatorStoreQuery: Send + Sync {
  fn find_by_name(&self, value: &str) -> Result<Option<StoredIndicator>, FeedError>;
}

/// Errors propagate unchanged: an unreachable store must stop emission.
pub fn exists(candidate_value: &str, store: &dyn IndicatorStoreQuery) -> Result<bool, FeedError> {
  Ok(store.find_by_name(candidate_value)?.is_some())
}

/// Drops records already in the store and repeats within the same run,
/// keeping the first occurrence in feed order.
pub struct DedupFilter<'a> {
  store: &'a dyn IndicatorStoreQuery,
  seen: HashSet<String>,
  pub duplicates: usize,
}

impl<'a> DedupFilter<'a> {
  pub fn new(store: &'a dyn IndicatorStoreQuery) -> Self {
    Self {
      store,
      seen: HashSet::new(),
      duplicates: 0,
    }
  }

  pub fn admit(&mut self, record: &IndicatorRecord) -> Result<bool, FeedError> {
    if self.seen.contains(&record.name) {
      self.duplicates += 1;
      return Ok(false);
    }
    if exists(&record.name, self.store)? {
      tracing::trace!(value = %record.name, "indicator already present in store");
      self.seen.insert(record.name.clone());
      self.duplicates += 1;
      return Ok(false);
    }
    self.seen.insert(record.name.clone());
    Ok(true)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::threat_feed::indicator::{self, FeedContext};
  use crate::types::{ExtractedIoc, IndicatorType};
  use std::sync::Mutex;

  struct FakeStore {
    known: Vec<String>,
    down: bool,
    lookups: Mutex<Vec<String>>,
  }

  impl IndicatorStoreQuery for FakeStore {
    fn find_by_name(&self, value: &str) -> Result<Option<StoredIndicator>, FeedError> {
      self.lookups.lock().unwrap().push(value.to_string());
      if self.down {
        return Err(FeedError::StoreUnavailable("connection refused".to_string()));
      }
      Ok(self.known.iter().find(|k| *k == value).map(|k| StoredIndicator {
        name: k.clone(),
        id: None,
        x_ioc_type: None,
      }))
    }
  }

  fn store(known: &[&str], down: bool) -> FakeStore {
    FakeStore {
      known: known.iter().map(|s| s.to_string()).collect(),
      down,
      lookups: Mutex::new(Vec::new()),
    }
  }

  fn record(value: &str) -> IndicatorRecord {
    let ctx = FeedContext {
      source_id: "f".to_string(),
      feed_name: "f".to_string(),
      feed_url: "https://feeds.example/f.txt".to_string(),
      indicator_source: "f".to_string(),
      confidence: None,
    };
    let ioc = ExtractedIoc::new(value, IndicatorType::Ipv4Addr).unwrap();
    indicator::build(&ioc, &ctx, chrono::Utc::now())
  }

  #[test]
  fn exists_reflects_store() {
    let s = store(&["192.0.2.1"], false);
    assert!(exists("192.0.2.1", &s).unwrap());
    assert!(!exists("192.0.2.2", &s).unwrap());
  }

  #[test]
  fn unreachable_store_is_an_error_not_a_miss() {
    let s = store(&[], true);
    assert!(matches!(exists("192.0.2.1", &s), Err(FeedError::StoreUnavailable(_))));
  }

  #[test]
  fn filter_drops_known_and_repeated_values() {
    let s = store(&["192.0.2.1"], false);
    let mut filter = DedupFilter::new(&s);
    assert!(!filter.admit(&record("192.0.2.1")).unwrap());
    assert!(filter.admit(&record("192.0.2.2")).unwrap());
    assert!(!filter.admit(&record("192.0.2.2")).unwrap());
    assert_eq!(filter.duplicates, 2);
    // Repeats are answered locally without another store round trip.
    assert_eq!(s.lookups.lock().unwrap().len(), 2);
  }
}
