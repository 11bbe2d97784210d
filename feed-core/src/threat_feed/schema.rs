use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const INDICATOR_OBJECT_TYPE: &str = "indicator";
pub const MALICIOUS_LABEL: &str = "malicious";

/// STIX-style indicator object as accepted by the indicator API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorRecord {
  #[serde(rename = "type")]
  pub object_type: String,
  pub id: String,
  pub created: DateTime<Utc>,
  pub modified: DateTime<Utc>,
  pub name: String,
  pub description: String,
  pub pattern: String,
  pub valid_from: DateTime<Utc>,
  pub valid_until: DateTime<Utc>,
  pub x_decay_timeperiod: u32,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub confidence: Option<u8>,
  pub x_indicator_source: String,
  pub labels: Vec<String>,
  #[serde(default)]
  pub x_threat_feed_list: Vec<String>,
  pub x_ioc_value: String,
  pub x_ioc_type: String,
  pub external_references: Vec<ExternalReference>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalReference {
  pub source_name: String,
  pub url: String,
}

/// Descriptive record for a feed, regenerated whenever its digest changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedMetadata {
  pub date_time_feed_fetched: DateTime<Utc>,
  pub threat_feed_url: String,
  pub threat_feed_name: String,
  pub reference_url: String,
  pub description: String,
  #[serde(rename = "type")]
  pub feed_type: String,
  #[serde(default)]
  pub tags: Vec<String>,
}

/// Normalized collection written for a feed after a changed run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedSnapshot {
  #[serde(default)]
  pub ioc_list: Vec<serde_json::Value>,
  #[serde(default)]
  pub threat_feed_context_details: Vec<String>,
  #[serde(default)]
  pub indicators: Vec<IndicatorRecord>,
}
