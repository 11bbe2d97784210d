use crate::types::IndicatorType;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LineMode {
  /// One candidate per line, type detected from the leading token.
  HashStrip,
  CsvColumn,
  WhitespaceColumn,
  JsonWholeDocument,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnExtractor {
  /// Zero-based column; negative values count from the end (`-1` is last).
  pub column: i32,
  pub indicator_type: IndicatorType,
}

impl ColumnExtractor {
  pub fn pick<'a>(&self, columns: &[&'a str]) -> Option<&'a str> {
    let idx = if self.column < 0 {
      columns.len().checked_sub(self.column.unsigned_abs() as usize)?
    } else {
      self.column as usize
    };
    columns.get(idx).copied()
  }
}

/// How one feed source lays out its lines. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedFormatRule {
  pub line_mode: LineMode,

  #[serde(default = "default_comment_prefixes")]
  pub comment_prefixes: Vec<String>,

  /// Whole lines (after trimming) that are column headers.
  #[serde(default)]
  pub header_lines: Vec<String>,

  /// Cell values that only ever appear in header rows.
  #[serde(default)]
  pub header_tokens: Vec<String>,

  #[serde(default = "default_field_separator")]
  pub field_separator: String,

  #[serde(default)]
  pub column_extractors: Vec<ColumnExtractor>,

  #[serde(default)]
  pub min_columns: usize,

  /// Hosts-file style lists only keep rows whose first column is this token.
  #[serde(default)]
  pub first_column_equals: Option<String>,
}

fn default_comment_prefixes() -> Vec<String> {
  vec!["#".to_string()]
}

fn default_field_separator() -> String {
  ",".to_string()
}

impl FeedFormatRule {
  pub fn hash_strip() -> Self {
    Self {
      line_mode: LineMode::HashStrip,
      comment_prefixes: default_comment_prefixes(),
      header_lines: Vec::new(),
      header_tokens: Vec::new(),
      field_separator: default_field_separator(),
      column_extractors: Vec::new(),
      min_columns: 0,
      first_column_equals: None,
    }
  }

  pub fn csv(columns: &[(i32, IndicatorType)]) -> Self {
    Self {
      line_mode: LineMode::CsvColumn,
      column_extractors: extractors(columns),
      ..Self::hash_strip()
    }
  }

  pub fn whitespace(columns: &[(i32, IndicatorType)]) -> Self {
    Self {
      line_mode: LineMode::WhitespaceColumn,
      field_separator: " ".to_string(),
      column_extractors: extractors(columns),
      ..Self::hash_strip()
    }
  }

  pub fn json_document() -> Self {
    Self {
      line_mode: LineMode::JsonWholeDocument,
      comment_prefixes: Vec::new(),
      ..Self::hash_strip()
    }
  }

  pub fn with_header_line(mut self, line: &str) -> Self {
    self.header_lines.push(line.to_string());
    self
  }

  pub fn with_header_tokens(mut self, tokens: &[&str]) -> Self {
    self.header_tokens.extend(tokens.iter().map(|t| t.to_string()));
    self
  }

  pub fn with_min_columns(mut self, n: usize) -> Self {
    self.min_columns = n;
    self
  }

  pub fn with_first_column(mut self, token: &str) -> Self {
    self.first_column_equals = Some(token.to_string());
    self
  }

  pub fn is_comment(&self, trimmed: &str) -> bool {
    self
      .comment_prefixes
      .iter()
      .filter(|p| !p.is_empty())
      .any(|p| trimmed.starts_with(p.as_str()))
  }

  pub fn is_header(&self, trimmed: &str) -> bool {
    self.header_lines.iter().any(|h| h.trim() == trimmed)
  }

  pub fn is_header_token(&self, value: &str) -> bool {
    self.header_tokens.iter().any(|t| t == value)
  }

  pub fn validate(&self) -> Result<(), String> {
    match self.line_mode {
      LineMode::CsvColumn | LineMode::WhitespaceColumn => {
        if self.column_extractors.is_empty() {
          return Err("column modes need at least one column extractor".to_string());
        }
        if self.line_mode == LineMode::CsvColumn && self.field_separator.is_empty() {
          return Err("csv-column mode needs a non-empty field separator".to_string());
        }
      }
      LineMode::HashStrip | LineMode::JsonWholeDocument => {}
    }
    Ok(())
  }
}

fn extractors(columns: &[(i32, IndicatorType)]) -> Vec<ColumnExtractor> {
  columns
    .iter()
    .map(|(column, indicator_type)| ColumnExtractor {
      column: *column,
      indicator_type: *indicator_type,
    })
    .collect()
}

pub const BUILTIN_RULE_NAMES: &[&str] = &[
  "auto-detect",
  "domain-list",
  "dictionary-ssh-attacks",
  "feodotracker-ip-blocklist",
  "brute-force-hosts",
  "viriback-c2-tracker",
  "sslbl-ip-blacklist",
  "hosts-file",
  "json-document",
];

/// Named parsing strategies for the public feeds this pipeline knows about.
/// Feeds in the config reference one of these by name or carry an inline rule.
pub fn builtin(name: &str) -> Option<FeedFormatRule> {
  use IndicatorType::{DomainName, Ipv4Addr, Url};

  let rule = match name {
    // ipsum, abuse.ch text lists, openphish, urlhaus
    "auto-detect" => FeedFormatRule::hash_strip(),
    // one domain per line with optional trailing "# note": coinblocker, botvrij, monero miner lists
    "domain-list" => FeedFormatRule::whitespace(&[(0, DomainName)]),
    // "<username> <count> <ip>" style SSH dictionary attack reports
    "dictionary-ssh-attacks" => FeedFormatRule::whitespace(&[(-1, Ipv4Addr)]),
    "feodotracker-ip-blocklist" => FeedFormatRule::csv(&[(1, Ipv4Addr)])
      .with_header_line(
        "\"first_seen_utc\",\"dst_ip\",\"dst_port\",\"c2_status\",\"last_online\",\"malware\"",
      )
      .with_header_tokens(&["dst_ip"])
      .with_min_columns(3),
    "brute-force-hosts" => FeedFormatRule::csv(&[(0, Ipv4Addr)]).with_header_tokens(&["ipv4"]),
    "viriback-c2-tracker" => FeedFormatRule::csv(&[(1, Url), (2, Ipv4Addr)])
      .with_header_line("Family,URL,IP,FirstSeen")
      .with_header_tokens(&["URL", "IP"])
      .with_min_columns(3),
    "sslbl-ip-blacklist" => FeedFormatRule::csv(&[(1, Ipv4Addr)])
      .with_header_line("Firstseen,DstIP,DstPort")
      .with_header_tokens(&["DstIP"])
      .with_min_columns(3),
    "hosts-file" => FeedFormatRule::whitespace(&[(-1, DomainName)])
      .with_first_column("0.0.0.0")
      .with_min_columns(2),
    "json-document" => FeedFormatRule::json_document(),
    _ => return None,
  };
  Some(rule)
}
