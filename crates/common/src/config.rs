use std::str::FromStr;
use std::time::Duration;

use crate::{Error, Result, Tier};

/// Which alert transport the dispatcher hands signals to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifierKind {
    Telegram,
    /// Write alerts to the tracing log only.
    Log,
}

/// All configuration loaded from environment variables at startup.
#[derive(Debug, Clone)]
pub struct Config {
    // Alert transport
    pub notifier: NotifierKind,
    pub telegram_token: String,
    pub telegram_chat_ids: Vec<i64>,

    // Exchange endpoints
    pub rest_url: String,
    pub stream_url: String,
    pub interval: String,

    // Universe
    pub max_pairs: usize,
    pub min_volume_usdt: f64,

    // Buffer / preload
    pub buffer_capacity: usize,
    pub preload_limit: usize,
    pub preload_concurrency: usize,

    // Supervisor timing
    pub refresh_interval: Duration,
    pub recv_timeout: Duration,
    pub reconnect_delay: Duration,
    pub http_timeout: Duration,
    pub http_retries: u32,

    // Analysis pool
    pub analysis_workers: usize,
    pub analysis_queue: usize,

    // Dispatch
    pub min_tier: Tier,
    pub cooldown_seconds: u64,

    /// Strategy settings file (TOML).
    pub sniper_config_path: String,
}

impl Config {
    /// Load configuration from the process environment.
    /// Loads `.env` if present.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv(); // ignore error if .env not present
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let notifier = match lookup("NOTIFIER")
            .unwrap_or_else(|| "telegram".to_string())
            .trim()
            .to_lowercase()
            .as_str()
        {
            "telegram" => NotifierKind::Telegram,
            "log" => NotifierKind::Log,
            other => {
                return Err(Error::Config(format!(
                    "NOTIFIER must be 'telegram' or 'log', got: '{other}'"
                )))
            }
        };

        let (telegram_token, telegram_chat_ids) = match notifier {
            NotifierKind::Telegram => {
                let token = required(&lookup, "TELEGRAM_TOKEN")?;
                let ids = parse_chat_ids(&required(&lookup, "TELEGRAM_CHAT_IDS")?)?;
                (token, ids)
            }
            NotifierKind::Log => {
                let ids = match lookup("TELEGRAM_CHAT_IDS") {
                    Some(raw) => parse_chat_ids(&raw)?,
                    None => Vec::new(),
                };
                (lookup("TELEGRAM_TOKEN").unwrap_or_default(), ids)
            }
        };

        let min_tier = lookup("MIN_TIER_TO_SEND")
            .map(|v| v.parse::<Tier>())
            .transpose()?
            .unwrap_or(Tier::A);

        Ok(Config {
            notifier,
            telegram_token,
            telegram_chat_ids,
            rest_url: lookup("BINANCE_REST_URL")
                .unwrap_or_else(|| "https://fapi.binance.com".to_string()),
            stream_url: lookup("BINANCE_STREAM_URL")
                .unwrap_or_else(|| "wss://fstream.binance.com/stream".to_string()),
            interval: lookup("KLINE_INTERVAL").unwrap_or_else(|| "5m".to_string()),
            max_pairs: parsed(&lookup, "MAX_USDT_PAIRS", 300)?,
            min_volume_usdt: parsed(&lookup, "MIN_VOLUME_USDT", 1_000_000.0)?,
            buffer_capacity: positive(&lookup, "BUFFER_CAPACITY", 300)?,
            preload_limit: parsed(&lookup, "PRELOAD_LIMIT", 150)?,
            preload_concurrency: positive(&lookup, "PRELOAD_CONCURRENCY", 8)?,
            refresh_interval: Duration::from_secs(
                positive::<u64, _>(&lookup, "REFRESH_PAIR_INTERVAL_HOURS", 24)? * 3600,
            ),
            recv_timeout: Duration::from_secs(positive(&lookup, "RECV_TIMEOUT_SECS", 30)?),
            reconnect_delay: Duration::from_secs(parsed(&lookup, "RECONNECT_DELAY_SECS", 3)?),
            http_timeout: Duration::from_secs(positive(&lookup, "HTTP_TIMEOUT_SECS", 10)?),
            http_retries: parsed(&lookup, "HTTP_RETRIES", 2)?,
            analysis_workers: positive(&lookup, "ANALYSIS_WORKERS", 16)?,
            analysis_queue: positive(&lookup, "ANALYSIS_QUEUE", 1024)?,
            min_tier,
            cooldown_seconds: parsed(&lookup, "SIGNAL_COOLDOWN_SECONDS", 600)?,
            sniper_config_path: lookup("SNIPER_CONFIG_PATH")
                .unwrap_or_else(|| "config/sniper.toml".to_string()),
        })
    }

    /// Minutes covered by one bar of the configured interval, if recognised.
    pub fn interval_minutes(&self) -> Option<u64> {
        interval_minutes(&self.interval)
    }
}

/// Parse a Binance interval string ("1m", "5m", "1h", "1d") into minutes.
pub fn interval_minutes(interval: &str) -> Option<u64> {
    let interval = interval.trim();
    let unit = interval.chars().last()?;
    let value: u64 = interval[..interval.len() - unit.len_utf8()].parse().ok()?;
    match unit {
        'm' => Some(value),
        'h' => Some(value * 60),
        'd' => Some(value * 60 * 24),
        'w' => Some(value * 60 * 24 * 7),
        _ => None,
    }
}

fn required<F>(lookup: &F, key: &str) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| {
            Error::Config(format!(
                "Required environment variable '{key}' is not set. Check your .env file."
            ))
        })
}

fn parsed<T, F>(lookup: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("{key} has an invalid value: '{raw}'"))),
        None => Ok(default),
    }
}

fn positive<T, F>(lookup: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr + PartialOrd + Default,
    F: Fn(&str) -> Option<String>,
{
    let value = parsed(lookup, key, default)?;
    if value <= T::default() {
        return Err(Error::Config(format!("{key} must be greater than zero")));
    }
    Ok(value)
}

fn parse_chat_ids(raw: &str) -> Result<Vec<i64>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i64>().map_err(|_| {
                Error::Config(format!("TELEGRAM_CHAT_IDS contains non-numeric ID: '{s}'"))
            })
        })
        .collect()
}
