use crate::config::FetchConfig;
use crate::error::FeedError;
use reqwest::blocking::{Client, Response};
use reqwest::header::USER_AGENT;
use reqwest::redirect::Policy;
use reqwest::Url;
use std::io::Read;
use std::time::Duration;

pub trait Fetcher: Send + Sync {
  fn fetch(&self, url: &str) -> Result<Vec<u8>, FeedError>;
}

impl<F: Fetcher + ?Sized> Fetcher for &F {
  fn fetch(&self, url: &str) -> Result<Vec<u8>, FeedError> {
    (**self).fetch(url)
  }
}

/// One GET per call; retries live in [`RetryingFetcher`].
pub struct HttpFetcher {
  client: Client,
  max_body_bytes: usize,
}

impl HttpFetcher {
  pub fn new(cfg: &FetchConfig) -> anyhow::Result<Self> {
    let client = Client::builder()
      .timeout(Duration::from_secs(cfg.timeout_seconds))
      .redirect(Policy::limited(5))
      .build()
      .map_err(|e| anyhow::anyhow!("build HTTP client: {e}"))?;
    Ok(Self {
      client,
      max_body_bytes: cfg.max_body_bytes,
    })
  }
}

impl Fetcher for HttpFetcher {
  fn fetch(&self, url: &str) -> Result<Vec<u8>, FeedError> {
    let parsed = Url::parse(url).map_err(|e| FeedError::Configuration(format!("invalid feed URL {url}: {e}")))?;
    let label = safe_url_label(&parsed);

    let response = self
      .client
      .get(parsed)
      .header(USER_AGENT, format!("feed-core/{}", env!("CARGO_PKG_VERSION")))
      .send()
      .map_err(|e| FeedError::fetch(&label, None, e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
      return Err(FeedError::fetch(
        &label,
        Some(status.as_u16()),
        format!("unexpected HTTP status {}", status.as_u16()),
      ));
    }

    read_response_with_limit(response, self.max_body_bytes).map_err(|reason| FeedError::fetch(&label, None, reason))
  }
}

fn read_response_with_limit(response: Response, max_bytes: usize) -> Result<Vec<u8>, String> {
  let mut out = Vec::new();
  let mut limited = response.take((max_bytes.saturating_add(1)) as u64);
  limited
    .read_to_end(&mut out)
    .map_err(|e| format!("read response body: {e}"))?;

  if out.len() > max_bytes {
    return Err(format!("response exceeds max size {max_bytes} bytes"));
  }
  Ok(out)
}

/// Host and path only; query strings on feed URLs often carry access keys.
pub fn safe_url_label(url: &Url) -> String {
  let host = url.host_str().unwrap_or("<no-host>");
  let mut path = url.path().to_string();
  if path.is_empty() {
    path = "/".to_string();
  }
  format!("{host}{path}")
}

/// Exponential backoff between fetch attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  /// Total attempts, including the first one.
  pub max_attempts: u32,
  pub initial_interval: Duration,
  pub backoff_coefficient: u32,
  pub maximum_interval: Duration,
}

impl RetryPolicy {
  pub fn from_config(cfg: &FetchConfig) -> Self {
    Self {
      max_attempts: cfg.max_attempts.max(1),
      initial_interval: Duration::from_millis(cfg.backoff_initial_ms),
      backoff_coefficient: cfg.backoff_coefficient.max(1),
      maximum_interval: Duration::from_millis(cfg.backoff_max_ms),
    }
  }

  /// No waiting between attempts; for tests and one-shot tools.
  pub fn immediate(max_attempts: u32) -> Self {
    Self {
      max_attempts: max_attempts.max(1),
      initial_interval: Duration::ZERO,
      backoff_coefficient: 1,
      maximum_interval: Duration::ZERO,
    }
  }

  /// Delay before retry number `attempt` (0-based: the wait after the first failure is attempt 0).
  pub fn time_until_next_retry(&self, attempt: u32) -> Duration {
    let factor = self.backoff_coefficient.saturating_pow(attempt);
    std::cmp::min(self.initial_interval.saturating_mul(factor), self.maximum_interval)
  }
}

pub struct RetryingFetcher<F> {
  inner: F,
  policy: RetryPolicy,
}

impl<F: Fetcher> RetryingFetcher<F> {
  pub fn new(inner: F, policy: RetryPolicy) -> Self {
    Self { inner, policy }
  }
}

impl<F: Fetcher> Fetcher for RetryingFetcher<F> {
  fn fetch(&self, url: &str) -> Result<Vec<u8>, FeedError> {
    let mut attempt = 0;
    loop {
      match self.inner.fetch(url) {
        Ok(bytes) => return Ok(bytes),
        Err(e) => {
          attempt += 1;
          if !e.is_retryable() || attempt >= self.policy.max_attempts {
            if attempt > 1 {
              tracing::warn!(attempts = attempt, error = %e, "giving up on feed fetch");
            }
            return Err(e);
          }
          let wait = self.policy.time_until_next_retry(attempt - 1);
          tracing::info!(attempt, wait_ms = wait.as_millis() as u64, error = %e, "feed fetch failed; retrying");
          if !wait.is_zero() {
            std::thread::sleep(wait);
          }
        }
      }
    }
  }
}
