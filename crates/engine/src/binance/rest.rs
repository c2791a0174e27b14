use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use common::{Bar, Config, Error, HistoryProvider, Result, UniverseProvider};

use super::{de_number, integer, number};

const RETRY_DELAY: Duration = Duration::from_secs(1);

/// REST client for Binance USDT-M futures public market data.
/// Provides the tradable universe and historical klines.
pub struct BinanceFuturesClient {
    base_url: String,
    http: Client,
    retries: u32,
}

impl BinanceFuturesClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration, retries: u32) -> Result<Self> {
        let http = Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Http(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
            retries,
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        Self::new(cfg.rest_url.clone(), cfg.http_timeout, cfg.http_retries)
    }

    /// GET with a fixed-delay retry on timeouts, connection errors, 429 and 5xx.
    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let url = format!("{}{path}", self.base_url);
        let mut attempt = 0;

        loop {
            let err = match self.http.get(&url).query(query).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;
                    if status.is_success() {
                        return Ok(serde_json::from_str(&body)?);
                    }
                    let err = Error::Exchange(format!("HTTP {status} on {path}: {body}"));
                    if !is_retryable(status) {
                        return Err(err);
                    }
                    err
                }
                Err(e) if e.is_timeout() || e.is_connect() || e.is_request() => {
                    Error::Http(e.to_string())
                }
                Err(e) => return Err(Error::Http(e.to_string())),
            };

            if attempt >= self.retries {
                return Err(err);
            }
            attempt += 1;
            warn!(path, attempt, error = %err, "REST request failed, retrying");
            tokio::time::sleep(RETRY_DELAY).await;
        }
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

#[async_trait]
impl UniverseProvider for BinanceFuturesClient {
    async fn tradable_pairs(&self, max_pairs: usize, min_quote_volume: f64) -> Result<Vec<String>> {
        let info: ExchangeInfo = self.get_json("/fapi/v1/exchangeInfo", &[]).await?;
        let tickers: Vec<Ticker24h> = self.get_json("/fapi/v1/ticker/24hr", &[]).await?;

        let pairs = select_pairs(&info, &tickers, max_pairs, min_quote_volume);
        info!(
            pairs = pairs.len(),
            min_quote_volume,
            "Loaded tradable USDT perpetual universe"
        );
        Ok(pairs)
    }
}

#[async_trait]
impl HistoryProvider for BinanceFuturesClient {
    async fn historical_bars(&self, pair: &str, interval: &str, limit: usize) -> Result<Vec<Bar>> {
        let rows: Vec<Value> = self
            .get_json(
                "/fapi/v1/klines",
                &[
                    ("symbol", pair.to_uppercase()),
                    ("interval", interval.to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;

        let total = rows.len();
        let bars: Vec<Bar> = rows.iter().filter_map(parse_kline_row).collect();
        if bars.len() < total {
            warn!(pair, interval, skipped = total - bars.len(), "Skipped malformed kline rows");
        }
        debug!(pair, interval, bars = bars.len(), "Fetched historical klines");
        Ok(bars)
    }
}

/// USDT-quoted perpetuals in TRADING status with 24h quote volume at least
/// `min_quote_volume`, by descending volume, capped at `max_pairs` (0 = no cap).
pub fn select_pairs(
    info: &ExchangeInfo,
    tickers: &[Ticker24h],
    max_pairs: usize,
    min_quote_volume: f64,
) -> Vec<String> {
    let eligible: HashSet<&str> = info
        .symbols
        .iter()
        .filter(|s| s.status == "TRADING" && s.quote_asset == "USDT" && s.contract_type == "PERPETUAL")
        .map(|s| s.symbol.as_str())
        .collect();

    let mut ranked: Vec<(&str, f64)> = tickers
        .iter()
        .filter(|t| eligible.contains(t.symbol.as_str()))
        .map(|t| (t.symbol.as_str(), t.quote_volume))
        .filter(|(_, volume)| *volume >= min_quote_volume)
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

    if max_pairs > 0 {
        ranked.truncate(max_pairs);
    }
    ranked.into_iter().map(|(s, _)| s.to_lowercase()).collect()
}

/// `[open_time, open, high, low, close, volume, close_time, ...]`.
/// Rows are marked closed here; `CandleBuffer::preload` reopens the one still forming.
pub fn parse_kline_row(row: &Value) -> Option<Bar> {
    let cols = row.as_array()?;
    if cols.len() < 7 {
        return None;
    }
    let bar = Bar {
        open_time: integer(&cols[0])?,
        open: number(&cols[1])?,
        high: number(&cols[2])?,
        low: number(&cols[3])?,
        close: number(&cols[4])?,
        volume: number(&cols[5])?,
        close_time: integer(&cols[6])?,
        closed: true,
    };
    bar.validate().ok().map(|_| bar)
}

// ─── Response types ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ExchangeInfo {
    #[serde(default)]
    pub symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolInfo {
    pub symbol: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub quote_asset: String,
    #[serde(default)]
    pub contract_type: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticker24h {
    pub symbol: String,
    #[serde(deserialize_with = "lenient_volume", default)]
    pub quote_volume: f64,
}

/// Unparseable volumes count as zero.
fn lenient_volume<'de, D: serde::Deserializer<'de>>(d: D) -> std::result::Result<f64, D::Error> {
    Ok(de_number(d).unwrap_or(0.0))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn info() -> ExchangeInfo {
        serde_json::from_value(json!({
            "symbols": [
                {"symbol": "BTCUSDT", "status": "TRADING", "quoteAsset": "USDT", "contractType": "PERPETUAL"},
                {"symbol": "ETHUSDT", "status": "TRADING", "quoteAsset": "USDT", "contractType": "PERPETUAL"},
                {"symbol": "SOLUSDT", "status": "TRADING", "quoteAsset": "USDT", "contractType": "PERPETUAL"},
                {"symbol": "BTCUSDT_250328", "status": "TRADING", "quoteAsset": "USDT", "contractType": "CURRENT_QUARTER"},
                {"symbol": "ETHBUSD", "status": "TRADING", "quoteAsset": "BUSD", "contractType": "PERPETUAL"},
                {"symbol": "LUNAUSDT", "status": "SETTLING", "quoteAsset": "USDT", "contractType": "PERPETUAL"}
            ]
        }))
        .unwrap()
    }

    fn tickers() -> Vec<Ticker24h> {
        serde_json::from_value(json!([
            {"symbol": "BTCUSDT", "quoteVolume": "9000000000.5"},
            {"symbol": "ETHUSDT", "quoteVolume": "4000000000"},
            {"symbol": "SOLUSDT", "quoteVolume": "500000"},
            {"symbol": "BTCUSDT_250328", "quoteVolume": "99999999999"},
            {"symbol": "ETHBUSD", "quoteVolume": "99999999999"},
            {"symbol": "LUNAUSDT", "quoteVolume": "99999999999"},
            {"symbol": "XRPUSDT", "quoteVolume": "not-a-number"}
        ]))
        .unwrap()
    }

    #[test]
    fn selects_liquid_usdt_perpetuals_by_volume() {
        let pairs = select_pairs(&info(), &tickers(), 0, 1_000_000.0);
        assert_eq!(pairs, vec!["btcusdt", "ethusdt"]);
    }

    #[test]
    fn caps_the_universe() {
        let pairs = select_pairs(&info(), &tickers(), 1, 0.0);
        assert_eq!(pairs, vec!["btcusdt"]);

        let all = select_pairs(&info(), &tickers(), 0, 0.0);
        assert_eq!(all, vec!["btcusdt", "ethusdt", "solusdt"]);
    }

    #[test]
    fn unparseable_volume_counts_as_zero() {
        let parsed = tickers();
        assert_eq!(parsed.last().unwrap().quote_volume, 0.0);
    }

    #[test]
    fn parses_kline_rows() {
        let row = json!([
            1700000000000i64, "36500.10", "36550.00", "36480.20", "36520.00", "123.456",
            1700000299999i64, "4500000.0", 1200, "60.1", "2200000.0", "0"
        ]);
        let bar = parse_kline_row(&row).unwrap();
        assert_eq!(bar.open_time, 1_700_000_000_000);
        assert_eq!(bar.close_time, 1_700_000_299_999);
        assert_eq!(bar.high, 36550.0);
        assert_eq!(bar.volume, 123.456);
        assert!(bar.closed);
    }

    #[test]
    fn skips_malformed_kline_rows() {
        assert!(parse_kline_row(&json!([1, "1", "2"])).is_none());
        assert!(parse_kline_row(&json!({"t": 1})).is_none());
        assert!(parse_kline_row(&json!([1, "x", "2", "0.5", "1", "1", 2])).is_none());
        assert!(parse_kline_row(&json!([1, "-1", "2", "0.5", "1", "1", 2])).is_none());
    }
}
