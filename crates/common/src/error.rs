use thiserror::Error;

/// Failures surfaced by the feed, the REST client, config loading and alert delivery.
///
/// Bad market data is reported as `Parse` and skipped by callers; nothing in
/// the pipeline treats it as fatal.
#[derive(Debug, Error)]
pub enum Error {
    /// Non-success answer from Binance, or an unusable universe.
    #[error("Binance API error: {0}")]
    Exchange(String),

    #[error("Kline stream error: {0}")]
    WebSocket(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Transport-level REST failure (timeout, connect, body read).
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Malformed market data: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Alert delivery failed: {0}")]
    Notify(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
