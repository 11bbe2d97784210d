use super::schema::{ExternalReference, IndicatorRecord, INDICATOR_OBJECT_TYPE, MALICIOUS_LABEL};
use crate::types::ExtractedIoc;
use chrono::{DateTime, Duration, Utc};

/// Days an indicator stays valid after it is first emitted.
pub const DECAY_DAYS: u32 = 30;

/// Feed-level facts stamped onto every record built for that feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedContext {
  pub source_id: String,
  pub feed_name: String,
  pub feed_url: String,
  pub indicator_source: String,
  pub confidence: Option<u8>,
}

pub fn decay_window() -> Duration {
  Duration::days(i64::from(DECAY_DAYS))
}

/// Pure: no I/O, and a fresh id on every call even for identical input.
pub fn build(ioc: &ExtractedIoc, ctx: &FeedContext, now: DateTime<Utc>) -> IndicatorRecord {
  let stix_path = ioc.indicator_type.stix_path();
  IndicatorRecord {
    object_type: INDICATOR_OBJECT_TYPE.to_string(),
    id: format!("indicator--{}", uuid::Uuid::new_v4()),
    created: now,
    modified: now,
    name: ioc.value.clone(),
    description: format!("This indicator indicates a {}.", stix_path),
    pattern: pattern(stix_path, &ioc.value),
    valid_from: now,
    valid_until: now + decay_window(),
    x_decay_timeperiod: DECAY_DAYS,
    confidence: ctx.confidence,
    x_indicator_source: ctx.indicator_source.clone(),
    labels: vec![MALICIOUS_LABEL.to_string(), ctx.feed_name.clone()],
    x_threat_feed_list: vec![ctx.feed_name.clone()],
    x_ioc_value: ioc.value.clone(),
    x_ioc_type: ioc.indicator_type.canonical().to_string(),
    external_references: vec![ExternalReference {
      source_name: ctx.feed_name.clone(),
      url: ctx.feed_url.clone(),
    }],
  }
}

fn pattern(stix_path: &str, value: &str) -> String {
  let escaped = value.replace('\\', "\\\\").replace('\'', "\\'");
  if stix_path.contains(':') {
    format!("[{stix_path} = '{escaped}']")
  } else {
    format!("[{stix_path}:value = '{escaped}']")
  }
}
