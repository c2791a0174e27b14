use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use common::{Error, Result};

/// Spike-Reversal strategy settings (TOML). Every field has a default, so a
/// partial file, or no file at all, is valid.
///
/// Example `config/sniper.toml`:
/// ```toml
/// cooldown_candles = 3
/// strict_sweep = false
///
/// [detector]
/// min_body_factor = 2.0
/// min_bear_candles = 6
///
/// [scoring]
/// max_stop_pct = 0.80
///
/// [context]
/// slow_interval = "1h"
/// slow_ttl_secs = 3600
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SniperSettings {
    pub detector: DetectorSettings,
    pub sweep: SweepSettings,
    pub scoring: ScoringSettings,
    pub context: ContextSettings,
    /// Minimum closed bars between two signals for the same pair.
    pub cooldown_candles: u64,
    /// Used only for the "entry valid for" line of the alert.
    pub max_entry_age_candles: u64,
    /// Require a confirmed liquidity sweep before the impulse bar.
    pub strict_sweep: bool,
}

impl Default for SniperSettings {
    fn default() -> Self {
        Self {
            detector: DetectorSettings::default(),
            sweep: SweepSettings::default(),
            scoring: ScoringSettings::default(),
            context: ContextSettings::default(),
            cooldown_candles: 3,
            max_entry_age_candles: 6,
            strict_sweep: false,
        }
    }
}

impl SniperSettings {
    /// Load from a TOML file. A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!(path = %path.display(), "No strategy settings file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content).map_err(|e| {
            Error::Config(format!("Failed to parse strategy config at '{}': {e}", path.display()))
        })
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }
}

/// Thresholds of the Spike-Reversal detector.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DetectorSettings {
    /// Bars required before the detector runs at all.
    pub min_history: usize,
    /// Trailing bars averaged for the impulse body comparison.
    pub body_lookback: usize,
    pub min_body_factor: f64,
    pub min_body_vs_range: f64,
    pub leg_lookback: usize,
    pub min_bear_candles: usize,
    pub min_bull_candles: usize,
    /// Trailing bars whose extreme the trigger bar must flush through.
    pub sweep_lookback: usize,
    /// Max opposing-wick / range ratio of the trigger bar.
    pub max_wick_ratio: f64,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            min_history: 25,
            body_lookback: 20,
            min_body_factor: 2.0,
            min_body_vs_range: 0.55,
            leg_lookback: 18,
            min_bear_candles: 6,
            min_bull_candles: 6,
            sweep_lookback: 15,
            max_wick_ratio: 0.25,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SweepSettings {
    pub max_lookback: usize,
    pub wick_factor: f64,
    pub range_factor: f64,
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            max_lookback: 3,
            wick_factor: 1.3,
            range_factor: 1.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ScoringSettings {
    /// Largest stop distance (percent of entry) that still counts as tradable.
    pub max_stop_pct: f64,
    /// Minimum reward:risk at the second target.
    pub min_rr_tp2: f64,
}

impl Default for ScoringSettings {
    fn default() -> Self {
        Self {
            max_stop_pct: 0.80,
            min_rr_tp2: 1.6,
        }
    }
}

/// Higher-timeframe context fetch and classification settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ContextSettings {
    pub slow_interval: String,
    pub slow_ttl_secs: u64,
    pub fast_interval: String,
    pub fast_ttl_secs: u64,
    /// Bars fetched per refresh.
    pub fetch_limit: usize,
    /// Trailing bars used for the discount/premium range.
    pub position_window: usize,
}

impl ContextSettings {
    pub fn slow_ttl(&self) -> Duration {
        Duration::from_secs(self.slow_ttl_secs)
    }

    pub fn fast_ttl(&self) -> Duration {
        Duration::from_secs(self.fast_ttl_secs)
    }
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self {
            slow_interval: "1h".to_string(),
            slow_ttl_secs: 3600,
            fast_interval: "15m".to_string(),
            fast_ttl_secs: 900,
            fetch_limit: 150,
            position_window: 60,
        }
    }
}
