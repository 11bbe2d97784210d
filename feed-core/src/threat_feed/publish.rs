use super::schema::IndicatorRecord;
use crate::error::FeedError;

/// Hands a batch of new indicators to the downstream store. Anything short
/// of full acceptance is an error; partial retries are not attempted here.
pub trait Publisher: Send + Sync {
  fn publish(&self, batch: &[IndicatorRecord]) -> Result<(), FeedError>;
}
