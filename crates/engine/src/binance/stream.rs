use async_trait::async_trait;
use futures_util::stream::{self, SelectAll};
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};
use url::Url;

use common::{Bar, Config, Error, FeedConnection, FeedConnector, KlineEvent, Result};

use super::{de_integer, de_number};

/// Binance caps the number of streams on one combined connection.
const MAX_STREAMS_PER_CONNECTION: usize = 200;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens Binance futures combined kline streams
/// (`{stream_url}?streams=<pair>@kline_<interval>/...`).
///
/// Universes above the per-connection stream cap are split over several
/// sockets and merged into one `FeedConnection`.
pub struct BinanceFeedConnector {
    stream_url: String,
}

impl BinanceFeedConnector {
    pub fn new(stream_url: impl Into<String>) -> Self {
        Self {
            stream_url: stream_url.into(),
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(cfg.stream_url.clone())
    }

    /// One combined-stream URL per chunk of pairs.
    pub fn stream_urls(&self, pairs: &[String], interval: &str) -> Result<Vec<Url>> {
        pairs
            .chunks(MAX_STREAMS_PER_CONNECTION)
            .map(|chunk| {
                let streams: Vec<String> = chunk
                    .iter()
                    .map(|p| format!("{}@kline_{interval}", p.to_lowercase()))
                    .collect();
                let raw = format!("{}?streams={}", self.stream_url, streams.join("/"));
                Url::parse(&raw).map_err(|e| Error::WebSocket(format!("invalid stream URL: {e}")))
            })
            .collect()
    }
}

#[async_trait]
impl FeedConnector for BinanceFeedConnector {
    async fn connect(&self, pairs: &[String], interval: &str) -> Result<Box<dyn FeedConnection>> {
        if pairs.is_empty() {
            return Err(Error::WebSocket("no pairs to subscribe".into()));
        }

        let urls = self.stream_urls(pairs, interval)?;
        let mut sockets = Vec::with_capacity(urls.len());
        for url in urls {
            let (ws, _) = connect_async(url)
                .await
                .map_err(|e| Error::WebSocket(e.to_string()))?;
            sockets.push(ws);
        }

        info!(
            pairs = pairs.len(),
            connections = sockets.len(),
            interval,
            "Connected to Binance kline streams"
        );
        Ok(Box::new(BinanceFeedConnection {
            streams: stream::select_all(sockets),
        }))
    }
}

struct BinanceFeedConnection {
    streams: SelectAll<WsStream>,
}

#[async_trait]
impl FeedConnection for BinanceFeedConnection {
    async fn next_message(&mut self) -> Option<Result<String>> {
        loop {
            match self.streams.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Close(frame)) => {
                    info!(?frame, "Binance closed the stream");
                    return None;
                }
                // pings are answered by tungstenite
                Ok(_) => continue,
                Err(e) => return Some(Err(Error::WebSocket(e.to_string()))),
            }
        }
    }
}

// ─── Binance kline JSON parsing ──────────────────────────────────────────────

#[derive(Deserialize)]
struct KlineData {
    #[serde(rename = "t", deserialize_with = "de_integer")]
    open_time: i64,
    #[serde(rename = "T", deserialize_with = "de_integer")]
    close_time: i64,
    #[serde(rename = "s", default)]
    symbol: Option<String>,
    #[serde(rename = "i", default)]
    interval: String,
    #[serde(rename = "o", deserialize_with = "de_number")]
    open: f64,
    #[serde(rename = "h", deserialize_with = "de_number")]
    high: f64,
    #[serde(rename = "l", deserialize_with = "de_number")]
    low: f64,
    #[serde(rename = "c", deserialize_with = "de_number")]
    close: f64,
    #[serde(rename = "v", deserialize_with = "de_number")]
    volume: f64,
    #[serde(rename = "x")]
    is_closed: bool,
}

/// Parse a combined-stream frame (`{"stream": .., "data": {..}}`) or a bare
/// kline event. `Ok(None)` for frames that are not kline events.
pub fn parse_kline_event(text: &str) -> Result<Option<KlineEvent>> {
    let frame: Value = serde_json::from_str(text)?;
    let data = frame.get("data").unwrap_or(&frame);

    if data.get("e").and_then(Value::as_str) != Some("kline") {
        debug!("Ignoring non-kline frame");
        return Ok(None);
    }
    let Some(k) = data.get("k") else {
        return Err(Error::Parse("kline event without 'k' payload".into()));
    };
    let k: KlineData = serde_json::from_value(k.clone())?;

    let from_stream = frame
        .get("stream")
        .and_then(Value::as_str)
        .and_then(|s| s.split('@').next())
        .filter(|s| !s.is_empty());
    let pair = from_stream
        .or(k.symbol.as_deref())
        .or_else(|| data.get("s").and_then(Value::as_str))
        .map(str::to_lowercase)
        .ok_or_else(|| Error::Parse("kline event without a symbol".into()))?;

    Ok(Some(KlineEvent {
        pair,
        interval: k.interval,
        bar: Bar {
            open_time: k.open_time,
            close_time: k.close_time,
            open: k.open,
            high: k.high,
            low: k.low,
            close: k.close,
            volume: k.volume,
            closed: k.is_closed,
        },
    }))
}
