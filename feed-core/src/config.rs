use crate::error::FeedError;
use crate::threat_feed::rules::{self, FeedFormatRule, LineMode};
use crate::threat_feed::FeedSource;
use anyhow::Context;
use crate::threat_feed::store::atomic_write_file;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub logging: LoggingConfig,

  #[serde(default)]
  pub fetch: FetchConfig,

  #[serde(default)]
  pub publish: PublishConfig,

  #[serde(default)]
  pub batch: BatchConfig,

  #[serde(default)]
  pub feeds: Vec<FeedSlot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
  #[serde(default = "default_log_level")]
  pub level: String,

  #[serde(default = "default_retention_days")]
  pub retention_days: u64,
}

fn default_log_level() -> String {
  "info".to_string()
}

fn default_retention_days() -> u64 {
  14
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: default_log_level(),
      retention_days: default_retention_days(),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
  #[serde(default = "default_max_attempts")]
  pub max_attempts: u32,

  #[serde(default = "default_fetch_timeout_seconds")]
  pub timeout_seconds: u64,

  #[serde(default = "default_backoff_initial_ms")]
  pub backoff_initial_ms: u64,

  #[serde(default = "default_backoff_coefficient")]
  pub backoff_coefficient: u32,

  #[serde(default = "default_backoff_max_ms")]
  pub backoff_max_ms: u64,

  #[serde(default = "default_max_body_bytes")]
  pub max_body_bytes: usize,
}

fn default_max_attempts() -> u32 {
  3
}

fn default_fetch_timeout_seconds() -> u64 {
  30
}

fn default_backoff_initial_ms() -> u64 {
  1_000
}

fn default_backoff_coefficient() -> u32 {
  2
}

fn default_backoff_max_ms() -> u64 {
  30_000
}

fn default_max_body_bytes() -> usize {
  64 * 1024 * 1024
}

impl Default for FetchConfig {
  fn default() -> Self {
    Self {
      max_attempts: default_max_attempts(),
      timeout_seconds: default_fetch_timeout_seconds(),
      backoff_initial_ms: default_backoff_initial_ms(),
      backoff_coefficient: default_backoff_coefficient(),
      backoff_max_ms: default_backoff_max_ms(),
      max_body_bytes: default_max_body_bytes(),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishMode {
  /// POST batches to the indicator API and dedup against its search endpoint.
  Api,
  /// Keep indicators in a JSON index under the data directory.
  Local,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishConfig {
  #[serde(default = "default_publish_mode")]
  pub mode: PublishMode,

  #[serde(default = "default_api_url")]
  pub api_url: String,

  /// Name of the environment variable holding the API key. The key itself
  /// never lives in the config file.
  #[serde(default = "default_api_key_env")]
  pub api_key_env: String,

  #[serde(default = "default_publish_timeout_seconds")]
  pub timeout_seconds: u64,
}

fn default_publish_mode() -> PublishMode {
  PublishMode::Local
}

fn default_api_url() -> String {
  "http://127.0.0.1:8000".to_string()
}

fn default_api_key_env() -> String {
  "FEED_CORE_API_KEY".to_string()
}

fn default_publish_timeout_seconds() -> u64 {
  30
}

impl Default for PublishConfig {
  fn default() -> Self {
    Self {
      mode: default_publish_mode(),
      api_url: default_api_url(),
      api_key_env: default_api_key_env(),
      timeout_seconds: default_publish_timeout_seconds(),
    }
  }
}

impl PublishConfig {
  pub fn api_key(&self) -> Result<String, FeedError> {
    match std::env::var(&self.api_key_env) {
      Ok(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
      _ => Err(FeedError::Configuration(format!(
        "publish mode is api but {} is not set",
        self.api_key_env
      ))),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
  #[serde(default = "default_max_parallel")]
  pub max_parallel: usize,
}

fn default_max_parallel() -> usize {
  4
}

impl Default for BatchConfig {
  fn default() -> Self {
    Self {
      max_parallel: default_max_parallel(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedConfig {
  pub source_id: String,

  #[serde(default)]
  pub url: String,

  /// Several JSON documents fetched together and stored as one array.
  /// Mutually exclusive with `url`.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub urls: Vec<String>,

  /// Display name; defaults to `source_id`.
  #[serde(default)]
  pub name: Option<String>,

  #[serde(default)]
  pub reference_url: String,

  #[serde(default)]
  pub description: String,

  #[serde(default = "default_feed_type")]
  pub feed_type: String,

  #[serde(default)]
  pub tags: Vec<String>,

  #[serde(default)]
  pub confidence: Option<u8>,

  /// Value for `x_indicator_source`; defaults to `source_id`.
  #[serde(default)]
  pub indicator_source: Option<String>,

  #[serde(default = "default_true")]
  pub enabled: bool,

  /// Name of a builtin parsing rule. Mutually exclusive with `format`.
  #[serde(default)]
  pub rule: Option<String>,

  #[serde(default)]
  pub format: Option<FeedFormatRule>,
}

fn default_feed_type() -> String {
  "ip".to_string()
}

fn default_true() -> bool {
  true
}

impl FeedConfig {
  fn sample(source_id: &str, url: &str, rule: &str, feed_type: &str, description: &str) -> Self {
    Self {
      source_id: source_id.to_string(),
      url: url.to_string(),
      urls: Vec::new(),
      name: None,
      reference_url: String::new(),
      description: description.to_string(),
      feed_type: feed_type.to_string(),
      tags: Vec::new(),
      confidence: None,
      indicator_source: None,
      enabled: true,
      rule: Some(rule.to_string()),
      format: None,
    }
  }

  pub fn resolve(&self) -> Result<FeedSource, FeedError> {
    let id = self.source_id.trim();
    if id.is_empty() {
      return Err(FeedError::Configuration("source_id must not be empty".to_string()));
    }
    if !id
      .chars()
      .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
      return Err(FeedError::Configuration(format!(
        "source_id {id:?} may only contain letters, digits, '_' and '-'"
      )));
    }

    let mut urls: Vec<&str> = self.urls.iter().map(|u| u.trim()).collect();
    match (self.url.trim(), urls.is_empty()) {
      ("", true) => return Err(FeedError::Configuration(format!("feed {id} has no url"))),
      ("", false) => {}
      (url, true) => urls.push(url),
      (_, false) => {
        return Err(FeedError::Configuration(format!(
          "feed {id} sets both `url` and `urls`"
        )))
      }
    }
    for url in &urls {
      check_feed_url(id, url)?;
    }

    let rule = match (&self.rule, &self.format) {
      (Some(_), Some(_)) => {
        return Err(FeedError::Configuration(format!(
          "feed {id} sets both `rule` and `format`"
        )))
      }
      (Some(name), None) => rules::builtin(name.trim())
        .ok_or_else(|| FeedError::Configuration(format!("feed {id} references unknown rule {name:?}")))?,
      (None, Some(format)) => format.clone(),
      (None, None) => {
        return Err(FeedError::Configuration(format!("feed {id} has no parsing rule")))
      }
    };
    rule
      .validate()
      .map_err(|reason| FeedError::Configuration(format!("feed {id}: {reason}")))?;
    if urls.len() > 1 && rule.line_mode != LineMode::JsonWholeDocument {
      return Err(FeedError::Configuration(format!(
        "feed {id}: several `urls` need the json-whole-document line mode"
      )));
    }

    if let Some(c) = self.confidence {
      if c > 100 {
        return Err(FeedError::Configuration(format!(
          "feed {id} confidence must be 0-100"
        )));
      }
    }

    let name = self
      .name
      .as_deref()
      .map(str::trim)
      .filter(|n| !n.is_empty())
      .unwrap_or(id);

    Ok(FeedSource {
      source_id: id.to_string(),
      url: urls[0].to_string(),
      extra_urls: urls[1..].iter().map(|u| u.to_string()).collect(),
      display_name: name.to_string(),
      reference_url: self.reference_url.clone(),
      description: self.description.clone(),
      feed_type: self.feed_type.clone(),
      tags: self.tags.clone(),
      confidence: self.confidence,
      indicator_source: self.indicator_source.clone().unwrap_or_else(|| id.to_string()),
      rule,
    })
  }
}

fn check_feed_url(id: &str, url: &str) -> Result<(), FeedError> {
  match reqwest::Url::parse(url) {
    Ok(u) if u.scheme() == "https" || u.scheme() == "http" => Ok(()),
    Ok(u) => Err(FeedError::Configuration(format!(
      "feed {id} url must be http(s), got {}",
      u.scheme()
    ))),
    Err(e) => Err(FeedError::Configuration(format!("feed {id} url invalid: {e}"))),
  }
}

/// One `[[feeds]]` table. A table that does not fit `FeedConfig` (wrong
/// types, missing `source_id`) is kept raw so the rest of the file still
/// loads; it surfaces as that feed's configuration error.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedSlot {
  Valid(FeedConfig),
  Invalid {
    source_id: Option<String>,
    reason: String,
    raw: toml::Value,
  },
}

impl FeedSlot {
  fn enabled(&self) -> bool {
    match self {
      Self::Valid(feed) => feed.enabled,
      Self::Invalid { raw, .. } => raw.get("enabled").and_then(toml::Value::as_bool) != Some(false),
    }
  }
}

impl From<FeedConfig> for FeedSlot {
  fn from(feed: FeedConfig) -> Self {
    Self::Valid(feed)
  }
}

impl Serialize for FeedSlot {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    match self {
      Self::Valid(feed) => feed.serialize(serializer),
      Self::Invalid { raw, .. } => raw.serialize(serializer),
    }
  }
}

impl<'de> Deserialize<'de> for FeedSlot {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let raw = toml::Value::deserialize(deserializer)?;
    match raw.clone().try_into::<FeedConfig>() {
      Ok(feed) => Ok(Self::Valid(feed)),
      Err(e) => Ok(Self::Invalid {
        source_id: raw
          .get("source_id")
          .and_then(toml::Value::as_str)
          .map(str::trim)
          .filter(|id| !id.is_empty())
          .map(str::to_string),
        reason: e.message().to_string(),
        raw,
      }),
    }
  }
}

pub fn default_feeds() -> Vec<FeedConfig> {
  vec![
    FeedConfig::sample(
      "ipsum_level3",
      "https://raw.githubusercontent.com/stamparm/ipsum/master/levels/3.txt",
      "auto-detect",
      "ip",
      "IPs reported by at least 3 blacklists",
    ),
    FeedConfig::sample(
      "feodotracker_ip_blocklist",
      "https://feodotracker.abuse.ch/downloads/ipblocklist.csv",
      "feodotracker-ip-blocklist",
      "ip",
      "Botnet C2 servers tracked by Feodo Tracker",
    ),
    FeedConfig::sample(
      "sslbl_ip_blacklist",
      "https://sslbl.abuse.ch/blacklist/sslipblacklist.csv",
      "sslbl-ip-blacklist",
      "ip",
      "Botnet C2 IPs identified by malicious SSL certificates",
    ),
    FeedConfig::sample(
      "viriback_c2_tracker",
      "https://tracker.viriback.com/dump.php",
      "viriback-c2-tracker",
      "url",
      "Malware C2 panels",
    ),
    FeedConfig::sample(
      "nocoin",
      "https://raw.githubusercontent.com/hoshsadiq/adblock-nocoin-list/master/hosts.txt",
      "hosts-file",
      "domain",
      "Browser-based crypto mining domains",
    ),
    FeedConfig::sample(
      "coinblocker_domains",
      "https://zerodot1.gitlab.io/CoinBlockerLists/list.txt",
      "domain-list",
      "domain",
      "Cryptojacking and mining pool domains",
    ),
    FeedConfig::sample(
      "feodotracker_ip_json",
      "https://feodotracker.abuse.ch/downloads/ipblocklist.json",
      "json-document",
      "ip",
      "Feodo Tracker blocklist as a JSON document",
    ),
  ]
}

impl Config {
  pub fn with_default_feeds() -> Self {
    Self {
      feeds: default_feeds().into_iter().map(FeedSlot::from).collect(),
      ..Self::default()
    }
  }

  /// Resolves every enabled feed. A bad feed only disqualifies itself.
  pub fn resolve_feeds(&self) -> (Vec<FeedSource>, Vec<(String, FeedError)>) {
    let mut ok = Vec::new();
    let mut errors = Vec::new();
    let mut seen = HashSet::new();

    for (index, slot) in self.feeds.iter().enumerate().filter(|(_, s)| s.enabled()) {
      let feed = match slot {
        FeedSlot::Valid(feed) => feed,
        FeedSlot::Invalid {
          source_id, reason, ..
        } => {
          let id = source_id.clone().unwrap_or_else(|| format!("feeds[{index}]"));
          errors.push((
            id.clone(),
            FeedError::Configuration(format!("feed {id}: {reason}")),
          ));
          continue;
        }
      };
      let id = feed.source_id.trim().to_string();
      if !seen.insert(id.clone()) {
        errors.push((
          id.clone(),
          FeedError::Configuration(format!("duplicate source_id {id}")),
        ));
        continue;
      }
      match feed.resolve() {
        Ok(source) => ok.push(source),
        Err(e) => errors.push((id, e)),
      }
    }

    (ok, errors)
  }
}

/// Writes defaults when the file is missing. A file that is not a TOML
/// config document at all is moved aside to `config.toml.bad-<unix-ts>` and
/// replaced by defaults; a malformed `[[feeds]]` entry only rejects that feed.
pub fn load_or_create_default(path: &Path) -> anyhow::Result<Config> {
  let parent = path
    .parent()
    .ok_or_else(|| anyhow::anyhow!("config path has no parent: {}", path.display()))?;
  fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;

  if !path.exists() {
    let cfg = Config::with_default_feeds();
    atomic_write_file(path, toml::to_string_pretty(&cfg)?.as_bytes())?;
    eprintln!("feed-core: default config written to {}", path.display());
    return Ok(cfg);
  }

  match load(path) {
    Ok(cfg) => Ok(cfg),
    Err(e) => {
      let cfg = Config::with_default_feeds();
      let ts = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
      let backup = parent.join(format!("config.toml.bad-{ts}"));
      fs::rename(path, &backup).with_context(|| format!("back up {}", path.display()))?;
      atomic_write_file(path, toml::to_string_pretty(&cfg)?.as_bytes())?;
      eprintln!(
        "feed-core: invalid config at {} (backed up to {}): {e:#}",
        path.display(),
        backup.display()
      );
      Ok(cfg)
    }
  }
}

/// Strict read of an explicit config file; never writes.
pub fn load(path: &Path) -> anyhow::Result<Config> {
  let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
  toml::from_str::<Config>(&raw).with_context(|| format!("parse {}", path.display()))
}
