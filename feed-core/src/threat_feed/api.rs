use super::dedup::{IndicatorStoreQuery, StoredIndicator};
use super::publish::Publisher;
use super::schema::IndicatorRecord;
use crate::config::PublishConfig;
use crate::error::FeedError;
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::Serialize;
use std::time::Duration;

pub const SEARCH_PATH: &str = "/api/v1/search_indicator";
pub const PROCESS_PATH: &str = "/api/v1/process_indicators";
const API_KEY_HEADER: &str = "api-key";

#[derive(Serialize)]
struct SearchRequest<'a> {
  indicator_value: &'a str,
  indicator_type: &'a str,
}

/// Remote indicator service: point lookups for dedup and batch ingestion.
pub struct IndicatorApi {
  client: Client,
  search_url: String,
  process_url: String,
  api_key: String,
}

impl IndicatorApi {
  pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, FeedError> {
    let base = base_url.trim().trim_end_matches('/');
    if !(base.starts_with("http://") || base.starts_with("https://")) {
      return Err(FeedError::Configuration(format!("api_url must be http(s): {base_url:?}")));
    }
    let client = Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| FeedError::Configuration(format!("build HTTP client: {e}")))?;
    Ok(Self {
      client,
      search_url: format!("{base}{SEARCH_PATH}"),
      process_url: format!("{base}{PROCESS_PATH}"),
      api_key: api_key.to_string(),
    })
  }

  pub fn from_config(cfg: &PublishConfig) -> Result<Self, FeedError> {
    Self::new(&cfg.api_url, &cfg.api_key()?, Duration::from_secs(cfg.timeout_seconds))
  }
}

impl IndicatorStoreQuery for IndicatorApi {
  fn find_by_name(&self, value: &str) -> Result<Option<StoredIndicator>, FeedError> {
    let response = self
      .client
      .post(&self.search_url)
      .header(API_KEY_HEADER, &self.api_key)
      .json(&SearchRequest {
        indicator_value: value,
        indicator_type: "indicator",
      })
      .send()
      .map_err(|e| FeedError::StoreUnavailable(format!("search request failed: {e}")))?;

    let status = response.status();
    if status == StatusCode::NOT_FOUND {
      return Ok(None);
    }
    if !status.is_success() {
      return Err(FeedError::StoreUnavailable(format!("search returned HTTP {}", status.as_u16())));
    }

    let body: serde_json::Value = response
      .json()
      .map_err(|e| FeedError::StoreUnavailable(format!("search response unreadable: {e}")))?;
    Ok(first_hit(body, value))
  }
}

/// The search endpoint answers with either one record, a list of them, or
/// `null`. Only hits whose name matches exactly count.
fn first_hit(body: serde_json::Value, value: &str) -> Option<StoredIndicator> {
  let candidates = match body {
    serde_json::Value::Array(items) => items,
    serde_json::Value::Null => Vec::new(),
    other => vec![other],
  };
  candidates
    .into_iter()
    .filter_map(|v| serde_json::from_value::<StoredIndicator>(v).ok())
    .find(|hit| hit.name == value)
}

impl Publisher for IndicatorApi {
  fn publish(&self, batch: &[IndicatorRecord]) -> Result<(), FeedError> {
    let response = self
      .client
      .post(&self.process_url)
      .header(API_KEY_HEADER, &self.api_key)
      .json(batch)
      .send()
      .map_err(|e| FeedError::StoreUnavailable(format!("publish request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
      return Err(FeedError::StoreUnavailable(format!(
        "publish of {} indicators returned HTTP {}",
        batch.len(),
        status.as_u16()
      )));
    }
    tracing::debug!(count = batch.len(), "batch accepted by indicator api");
    Ok(())
  }
}
