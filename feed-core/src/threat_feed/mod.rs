use crate::paths;
use chrono::{DateTime, Utc};
use std::path::Path;

pub mod api;
pub mod batch;
pub mod checksum;
pub mod dedup;
pub mod fetch;
pub mod indicator;
pub mod parser;
pub mod pipeline;
pub mod publish;
pub mod rules;
pub mod schema;
pub mod store;

use indicator::FeedContext;
use rules::FeedFormatRule;
use schema::FeedMetadata;

/// A validated feed entry from the config, ready to run.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedSource {
  pub source_id: String,
  pub url: String,
  /// Further JSON documents fetched after `url`; the run merges them all
  /// into one array so the feed keeps a single checksum.
  pub extra_urls: Vec<String>,
  pub display_name: String,
  pub reference_url: String,
  pub description: String,
  pub feed_type: String,
  pub tags: Vec<String>,
  pub confidence: Option<u8>,
  pub indicator_source: String,
  pub rule: FeedFormatRule,
}

impl FeedSource {
  pub fn context(&self) -> FeedContext {
    FeedContext {
      source_id: self.source_id.clone(),
      feed_name: self.display_name.clone(),
      feed_url: self.url.clone(),
      indicator_source: self.indicator_source.clone(),
      confidence: self.confidence,
    }
  }

  pub fn metadata(&self, fetched_at: DateTime<Utc>) -> FeedMetadata {
    FeedMetadata {
      date_time_feed_fetched: fetched_at,
      threat_feed_url: self.url.clone(),
      threat_feed_name: self.display_name.clone(),
      reference_url: self.reference_url.clone(),
      description: self.description.clone(),
      feed_type: self.feed_type.clone(),
      tags: self.tags.clone(),
    }
  }
}

#[derive(Debug, Clone)]
pub struct FeedStatus {
  pub source_id: String,
  pub has_checksum: bool,
  pub last_fetched: Option<DateTime<Utc>>,
}

/// What the data directory knows about each feed from earlier runs.
pub fn status(base: &Path, sources: &[FeedSource]) -> Vec<FeedStatus> {
  sources
    .iter()
    .map(|s| FeedStatus {
      source_id: s.source_id.clone(),
      has_checksum: paths::feed_checksum_path(base, &s.source_id).exists(),
      last_fetched: store::read_metadata(base, &s.source_id).map(|m| m.date_time_feed_fetched),
    })
    .collect()
}
