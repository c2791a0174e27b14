use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Error;

/// One OHLCV bar (Binance kline) for a single instrument.
///
/// `open_time` / `close_time` are exchange timestamps in milliseconds.
/// `closed` is false while the bar is still being updated by the feed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub open_time: i64,
    pub close_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub closed: bool,
}

impl Bar {
    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }

    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    pub fn upper_wick(&self) -> f64 {
        self.high - self.open.max(self.close)
    }

    pub fn lower_wick(&self) -> f64 {
        self.open.min(self.close) - self.low
    }

    pub fn mid_body(&self) -> f64 {
        0.5 * (self.open + self.close)
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }

    /// Reject bars whose prices or volume are not finite non-negative numbers.
    pub fn validate(&self) -> crate::Result<()> {
        let fields = [
            ("open", self.open),
            ("high", self.high),
            ("low", self.low),
            ("close", self.close),
            ("volume", self.volume),
        ];
        for (name, value) in fields {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::Parse(format!("bar field '{name}' is invalid: {value}")));
            }
        }
        Ok(())
    }
}

/// Live kline update from the exchange stream.
#[derive(Debug, Clone, PartialEq)]
pub struct KlineEvent {
    /// Lower-case instrument id, e.g. "btcusdt".
    pub pair: String,
    pub interval: String,
    pub bar: Bar,
}

/// Immutable copy of one instrument's buffer, handed to analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct History {
    pub pair: String,
    pub bars: Vec<Bar>,
    /// Monotonic count of distinct closed bars seen for this pair.
    pub closed_count: u64,
}

impl History {
    pub fn last(&self) -> Option<&Bar> {
        self.bars.last()
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }
}

/// Direction of a reversal setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn label(&self) -> &'static str {
        match self {
            Side::Long => "LONG",
            Side::Short => "SHORT",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Long => write!(f, "long"),
            Side::Short => write!(f, "short"),
        }
    }
}

/// Swing-structure classification of a higher timeframe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Trend {
    Up,
    Down,
    #[default]
    Range,
}

impl std::fmt::Display for Trend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Trend::Up => write!(f, "UP"),
            Trend::Down => write!(f, "DOWN"),
            Trend::Range => write!(f, "RANGE"),
        }
    }
}

/// Where the latest close sits inside the trailing range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum PricePosition {
    Discount,
    #[default]
    Mid,
    Premium,
}

impl std::fmt::Display for PricePosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PricePosition::Discount => write!(f, "DISCOUNT"),
            PricePosition::Mid => write!(f, "MID"),
            PricePosition::Premium => write!(f, "PREMIUM"),
        }
    }
}

/// Derived trend/position view of one (instrument, timeframe).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub captured_at: DateTime<Utc>,
    pub trend: Trend,
    pub position: PricePosition,
    pub range_high: Option<f64>,
    pub range_low: Option<f64>,
    pub last_price: Option<f64>,
}

impl ContextSnapshot {
    /// RANGE / MID with no price data. Used when nothing was ever fetched.
    pub fn neutral() -> Self {
        Self {
            captured_at: Utc::now(),
            trend: Trend::Range,
            position: PricePosition::Mid,
            range_high: None,
            range_low: None,
            last_price: None,
        }
    }
}

/// Combined slow/fast timeframe context consumed by the scorer and the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HtfContext {
    pub slow_trend: Trend,
    pub slow_position: PricePosition,
    pub fast_position: PricePosition,
    pub favorable_long: bool,
    pub favorable_short: bool,
}

impl HtfContext {
    pub fn favorable(&self, side: Side) -> bool {
        match side {
            Side::Long => self.favorable_long,
            Side::Short => self.favorable_short,
        }
    }
}

impl Default for HtfContext {
    fn default() -> Self {
        Self {
            slow_trend: Trend::Range,
            slow_position: PricePosition::Mid,
            fast_position: PricePosition::Mid,
            favorable_long: true,
            favorable_short: true,
        }
    }
}

/// Ordinal signal-quality bucket. Ordering is `None < B < A < APlus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub enum Tier {
    #[default]
    #[serde(rename = "NONE")]
    None,
    B,
    A,
    #[serde(rename = "A+")]
    APlus,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::None => write!(f, "NONE"),
            Tier::B => write!(f, "B"),
            Tier::A => write!(f, "A"),
            Tier::APlus => write!(f, "A+"),
        }
    }
}

impl FromStr for Tier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "A+" => Ok(Tier::APlus),
            "A" => Ok(Tier::A),
            "B" => Ok(Tier::B),
            "NONE" => Ok(Tier::None),
            other => Err(Error::Config(format!(
                "tier must be one of A+, A, B, NONE; got '{other}'"
            ))),
        }
    }
}

/// Recommended leverage range in multiples.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LeverageBand {
    pub min: f64,
    pub max: f64,
}

/// A fully scored reversal signal. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: String,
    pub pair: String,
    pub side: Side,
    pub entry: f64,
    pub stop: f64,
    pub targets: [f64; 3],
    pub stop_pct: f64,
    pub leverage: LeverageBand,
    pub tier: Tier,
    pub score: u32,
    pub context: HtfContext,
    /// `open_time` of the bar that triggered the setup.
    pub trigger_open_time: i64,
    pub created_at: DateTime<Utc>,
}

/// Rendered alert handed to the notifier. Consumed exactly once.
#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub signal: Signal,
    pub text: String,
}

/// Connection state of the stream supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FeedState {
    #[default]
    Stopped,
    Connecting,
    Preloading,
    Streaming,
    Backoff,
}

impl std::fmt::Display for FeedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeedState::Stopped => write!(f, "stopped"),
            FeedState::Connecting => write!(f, "connecting"),
            FeedState::Preloading => write!(f, "preloading"),
            FeedState::Streaming => write!(f, "streaming"),
            FeedState::Backoff => write!(f, "backoff"),
        }
    }
}
