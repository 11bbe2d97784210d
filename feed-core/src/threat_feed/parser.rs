//! Line-oriented IOC extraction driven by a [`FeedFormatRule`].
//!
//! Parsing never touches I/O: the same bytes and rule always produce the same
//! ordered entries, so a [`ParsedFeed`] can simply be rebuilt to start over.

use super::rules::{FeedFormatRule, LineMode};
use crate::error::FeedError;
use crate::types::{ExtractedIoc, FeedEntry, IndicatorType};
use regex::Regex;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;
use std::sync::OnceLock;

const QUOTES: &[char] = &['"', '\''];

/// Priority order for type detection on type-agnostic lists.
const DETECTION_ORDER: [IndicatorType; 7] = [
  IndicatorType::Ipv4Addr,
  IndicatorType::Ipv6Addr,
  IndicatorType::FileHashMd5,
  IndicatorType::FileHashSha1,
  IndicatorType::FileHashSha256,
  IndicatorType::FileHashSha512,
  IndicatorType::Url,
];

pub fn parse<'a>(raw: &'a [u8], rule: &'a FeedFormatRule) -> Result<ParsedFeed<'a>, FeedError> {
  let text = decode(raw)?;

  let state = match rule.line_mode {
    LineMode::JsonWholeDocument => {
      if text.trim().is_empty() {
        State::Document(None)
      } else {
        let doc: serde_json::Value =
          serde_json::from_str(text).map_err(|e| FeedError::Decode(format!("invalid JSON: {e}")))?;
        State::Document(Some(doc))
      }
    }
    _ => State::Lines {
      lines: text.lines(),
      pending: Vec::new().into_iter(),
    },
  };

  Ok(ParsedFeed { rule, state })
}

/// Raw, trimmed, non-empty lines kept as context next to the extracted IOCs.
pub fn context_lines(raw: &[u8]) -> Result<Vec<String>, FeedError> {
  Ok(
    decode(raw)?
      .lines()
      .map(str::trim)
      .filter(|l| !l.is_empty())
      .map(str::to_string)
      .collect(),
  )
}

fn decode(raw: &[u8]) -> Result<&str, FeedError> {
  let text = std::str::from_utf8(raw)
    .map_err(|e| FeedError::Decode(format!("content is not valid UTF-8: {e}")))?;
  Ok(text.strip_prefix('\u{feff}').unwrap_or(text))
}

pub struct ParsedFeed<'a> {
  rule: &'a FeedFormatRule,
  state: State<'a>,
}

enum State<'a> {
  Lines {
    lines: std::str::Lines<'a>,
    pending: std::vec::IntoIter<ExtractedIoc>,
  },
  Document(Option<serde_json::Value>),
}

impl Iterator for ParsedFeed<'_> {
  type Item = FeedEntry;

  fn next(&mut self) -> Option<FeedEntry> {
    match &mut self.state {
      State::Document(doc) => doc.take().map(FeedEntry::Document),
      State::Lines { lines, pending } => loop {
        if let Some(ioc) = pending.next() {
          return Some(FeedEntry::Ioc(ioc));
        }
        let line = lines.next()?;
        let found = match self.rule.line_mode {
          LineMode::HashStrip => hash_strip_line(self.rule, line).into_iter().collect(),
          LineMode::CsvColumn | LineMode::WhitespaceColumn => column_line(self.rule, line),
          LineMode::JsonWholeDocument => Vec::new(),
        };
        *pending = found.into_iter();
      },
    }
  }
}

fn skippable(rule: &FeedFormatRule, trimmed: &str) -> bool {
  trimmed.is_empty() || rule.is_comment(trimmed) || rule.is_header(trimmed)
}

fn hash_strip_line(rule: &FeedFormatRule, line: &str) -> Option<ExtractedIoc> {
  let trimmed = line.trim();
  if skippable(rule, trimmed) {
    return None;
  }

  let content = trimmed.split('#').next().unwrap_or("").trim();
  let token = content.split_whitespace().next()?;
  match detect(token) {
    Some(indicator_type) => ExtractedIoc::new(token, indicator_type),
    None => {
      tracing::trace!(token = %token, "line matched no indicator pattern");
      None
    }
  }
}

fn column_line(rule: &FeedFormatRule, line: &str) -> Vec<ExtractedIoc> {
  let trimmed = line.trim();
  if skippable(rule, trimmed) {
    return Vec::new();
  }

  let columns: Vec<&str> = match rule.line_mode {
    LineMode::WhitespaceColumn => trimmed.split_whitespace().collect(),
    _ => trimmed.split(rule.field_separator.as_str()).collect(),
  };
  if columns.len() < rule.min_columns {
    return Vec::new();
  }
  if let Some(first) = rule.first_column_equals.as_deref() {
    if clean_cell(columns[0]) != first {
      return Vec::new();
    }
  }

  let mut out = Vec::new();
  for extractor in &rule.column_extractors {
    let Some(cell) = extractor.pick(&columns) else {
      continue;
    };
    let value = clean_cell(cell);
    if value.is_empty() || rule.is_header_token(value) {
      continue;
    }
    if !matches_type(value, extractor.indicator_type) {
      tracing::trace!(
        value = %value,
        expected = %extractor.indicator_type,
        "column value does not match declared type"
      );
      continue;
    }
    out.extend(ExtractedIoc::new(value, extractor.indicator_type));
  }
  out
}

fn clean_cell(cell: &str) -> &str {
  cell.trim().trim_matches(QUOTES).trim()
}

/// First type in detection order whose shape the whole token has.
pub fn detect(token: &str) -> Option<IndicatorType> {
  DETECTION_ORDER
    .into_iter()
    .find(|t| matches_type(token, *t))
}

pub fn matches_type(token: &str, indicator_type: IndicatorType) -> bool {
  match indicator_type {
    IndicatorType::Ipv4Addr => is_ip_or_cidr::<Ipv4Addr>(token, 32),
    IndicatorType::Ipv6Addr => is_ip_or_cidr::<Ipv6Addr>(token, 128),
    IndicatorType::FileHashMd5 => is_hex_of_len(token, 32),
    IndicatorType::FileHashSha1 => is_hex_of_len(token, 40),
    IndicatorType::FileHashSha256 => is_hex_of_len(token, 64),
    IndicatorType::FileHashSha512 => is_hex_of_len(token, 128),
    IndicatorType::Url => url_pattern().is_match(token),
    IndicatorType::DomainName => token.len() <= 253 && domain_pattern().is_match(token),
  }
}

fn is_ip_or_cidr<T: FromStr>(token: &str, max_prefix: u8) -> bool {
  match token.split_once('/') {
    Some((addr, prefix)) => {
      T::from_str(addr).is_ok() && prefix.parse::<u8>().is_ok_and(|p| p <= max_prefix)
    }
    None => T::from_str(token).is_ok(),
  }
}

fn is_hex_of_len(token: &str, len: usize) -> bool {
  token.len() == len && token.bytes().all(|b| b.is_ascii_hexdigit())
}

fn url_pattern() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| Regex::new(r"^(?i)https?://[^\s/?#]+\S*$").expect("static URL pattern"))
}

fn domain_pattern() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| {
    Regex::new(r"^(?i)(?:[a-z0-9_](?:[a-z0-9_-]{0,61}[a-z0-9])?\.)+[a-z](?:[a-z0-9-]{0,61}[a-z0-9])?$")
      .expect("static domain pattern")
  })
}
