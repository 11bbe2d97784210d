use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of observable kinds a feed line can yield.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IndicatorType {
  Ipv4Addr,
  Ipv6Addr,
  DomainName,
  Url,
  FileHashMd5,
  FileHashSha1,
  FileHashSha256,
  FileHashSha512,
}

impl IndicatorType {
  pub const ALL: [IndicatorType; 8] = [
    IndicatorType::Ipv4Addr,
    IndicatorType::Ipv6Addr,
    IndicatorType::DomainName,
    IndicatorType::Url,
    IndicatorType::FileHashMd5,
    IndicatorType::FileHashSha1,
    IndicatorType::FileHashSha256,
    IndicatorType::FileHashSha512,
  ];

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Ipv4Addr => "ipv4-addr",
      Self::Ipv6Addr => "ipv6-addr",
      Self::DomainName => "domain-name",
      Self::Url => "url",
      Self::FileHashMd5 => "file-hash-md5",
      Self::FileHashSha1 => "file-hash-sha1",
      Self::FileHashSha256 => "file-hash-sha256",
      Self::FileHashSha512 => "file-hash-sha512",
    }
  }

  /// STIX object path used on the left side of an indicator pattern.
  pub fn stix_path(self) -> &'static str {
    match self {
      Self::Ipv4Addr => "ipv4-addr",
      Self::Ipv6Addr => "ipv6-addr",
      Self::DomainName => "domain-name",
      Self::Url => "url",
      Self::FileHashMd5 => "file:hashes.MD5",
      Self::FileHashSha1 => "file:hashes.SHA-1",
      Self::FileHashSha256 => "file:hashes.SHA-256",
      Self::FileHashSha512 => "file:hashes.SHA-512",
    }
  }

  /// Short form stored in `x_ioc_type`: the STIX path without the `-addr`
  /// suffix or the `file:hashes.` qualifier.
  pub fn canonical(self) -> &'static str {
    match self {
      Self::Ipv4Addr => "ipv4",
      Self::Ipv6Addr => "ipv6",
      Self::DomainName => "domain-name",
      Self::Url => "url",
      Self::FileHashMd5 => "MD5",
      Self::FileHashSha1 => "SHA-1",
      Self::FileHashSha256 => "SHA-256",
      Self::FileHashSha512 => "SHA-512",
    }
  }
}

impl fmt::Display for IndicatorType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExtractedIoc {
  pub value: String,
  pub indicator_type: IndicatorType,
}

impl ExtractedIoc {
  /// Returns `None` for blank values; an IOC is never empty.
  pub fn new(value: &str, indicator_type: IndicatorType) -> Option<Self> {
    let value = value.trim();
    if value.is_empty() {
      return None;
    }
    Some(Self {
      value: value.to_string(),
      indicator_type,
    })
  }
}

/// One item produced by the feed parser.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEntry {
  Ioc(ExtractedIoc),
  /// Already-structured payload passed through untouched.
  Document(serde_json::Value),
}

impl FeedEntry {
  pub fn as_ioc(&self) -> Option<&ExtractedIoc> {
    match self {
      Self::Ioc(ioc) => Some(ioc),
      Self::Document(_) => None,
    }
  }
}

#[derive(Debug, Clone)]
pub struct RawFeedDocument {
  pub source_id: String,
  pub content: Vec<u8>,
  pub fetched_at: DateTime<Utc>,
}

impl RawFeedDocument {
  pub fn new(source_id: &str, content: Vec<u8>) -> Self {
    Self {
      source_id: source_id.to_string(),
      content,
      fetched_at: Utc::now(),
    }
  }
}
