use async_trait::async_trait;

use crate::{Alert, Bar, Result};

/// Source of the tradable instrument list.
///
/// `BinanceFuturesClient` implements this with a 24h quote-volume filter.
#[async_trait]
pub trait UniverseProvider: Send + Sync {
    /// Lower-case instrument ids ordered by descending quote volume.
    /// `max_pairs == 0` means no cap.
    async fn tradable_pairs(&self, max_pairs: usize, min_quote_volume: f64) -> Result<Vec<String>>;
}

/// Historical bars endpoint.
#[async_trait]
pub trait HistoryProvider: Send + Sync {
    /// Return up to `limit` bars, oldest first. Malformed rows are skipped.
    async fn historical_bars(&self, pair: &str, interval: &str, limit: usize) -> Result<Vec<Bar>>;
}

/// One open live-feed connection. Yields raw text frames.
#[async_trait]
pub trait FeedConnection: Send {
    /// `None` means the remote closed the connection.
    async fn next_message(&mut self) -> Option<Result<String>>;
}

/// Opens live-feed connections for a set of pairs.
///
/// Only the `StreamSupervisor` holds a connector; it is the sole reader of the feed.
#[async_trait]
pub trait FeedConnector: Send + Sync {
    async fn connect(&self, pairs: &[String], interval: &str) -> Result<Box<dyn FeedConnection>>;
}

/// Delivery transport for finished alerts.
///
/// Exactly one implementation is chosen at startup (`NOTIFIER`); the
/// dispatcher never inspects which one it holds.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, alert: &Alert) -> Result<()>;
}
