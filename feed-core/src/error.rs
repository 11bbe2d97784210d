use thiserror::Error;

/// Failures that end a single feed's pipeline run. None of them abort the batch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeedError {
  #[error("fetch of {url} failed{}: {reason}", status_label(.status))]
  Fetch {
    url: String,
    status: Option<u16>,
    reason: String,
  },
  #[error("feed content could not be decoded: {0}")]
  Decode(String),
  #[error("indicator store unavailable: {0}")]
  StoreUnavailable(String),
  #[error("invalid feed configuration: {0}")]
  Configuration(String),
  #[error("local state could not be persisted: {0}")]
  Persist(String),
}

impl FeedError {
  pub fn fetch(url: &str, status: Option<u16>, reason: impl Into<String>) -> Self {
    Self::Fetch {
      url: url.to_string(),
      status,
      reason: reason.into(),
    }
  }

  /// Network failures, timeouts, 408, 429 and 5xx are worth another attempt.
  /// Any other HTTP status is final, as is every non-fetch error.
  pub fn is_retryable(&self) -> bool {
    match self {
      Self::Fetch { status: None, .. } => true,
      Self::Fetch {
        status: Some(code), ..
      } => *code == 408 || *code == 429 || *code >= 500,
      _ => false,
    }
  }

  /// Short tag used in logs and run reports.
  pub fn kind(&self) -> &'static str {
    match self {
      Self::Fetch { .. } => "fetch",
      Self::Decode(_) => "decode",
      Self::StoreUnavailable(_) => "store_unavailable",
      Self::Configuration(_) => "configuration",
      Self::Persist(_) => "persist",
    }
  }
}

fn status_label(status: &Option<u16>) -> String {
  match status {
    Some(code) => format!(" (HTTP {code})"),
    None => String::new(),
  }
}
