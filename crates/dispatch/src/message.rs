use std::fmt::Write as _;

use common::{Config, Side, Signal};
use strategy::SniperSettings;

/// Account balance used in the sizing example of every alert.
const EXAMPLE_BALANCE_USDT: f64 = 100.0;
/// Fraction of the balance put at risk in the sizing example.
const EXAMPLE_RISK_PCT: f64 = 1.0;

/// Static inputs for alert rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageFormat {
    /// Minutes per bar of the streamed interval; `None` when unrecognised.
    pub interval_minutes: Option<u64>,
    pub max_entry_age_candles: u64,
    pub slow_interval: String,
    pub fast_interval: String,
}

impl MessageFormat {
    pub fn new(cfg: &Config, settings: &SniperSettings) -> Self {
        Self {
            interval_minutes: cfg.interval_minutes(),
            max_entry_age_candles: settings.max_entry_age_candles,
            slow_interval: settings.context.slow_interval.clone(),
            fast_interval: settings.context.fast_interval.clone(),
        }
    }

    fn validity(&self) -> String {
        match self.interval_minutes.map(|m| m * self.max_entry_age_candles) {
            Some(minutes) if minutes > 0 => format!("~{minutes} min"),
            _ => "short".to_string(),
        }
    }
}

/// Plain-text alert body.
pub fn render(signal: &Signal, format: &MessageFormat) -> String {
    let emoji = match signal.side {
        Side::Long => "🟢",
        Side::Short => "🔴",
    };
    let ctx = &signal.context;
    let [tp1, tp2, tp3] = signal.targets;

    let mut text = String::new();
    // Writing to a String cannot fail.
    let _ = writeln!(
        text,
        "{emoji} SNIPER SIGNAL: {} {}",
        signal.pair.to_uppercase(),
        signal.side.label()
    );
    let _ = writeln!(text, "Entry : {:.6}", signal.entry);
    let _ = writeln!(text, "SL    : {:.6}", signal.stop);
    let _ = writeln!(text, "TP1   : {tp1:.6}");
    let _ = writeln!(text, "TP2   : {tp2:.6}");
    let _ = writeln!(text, "TP3   : {tp3:.6}");
    let _ = writeln!(text, "Model : Spike-Reversal Sniper");
    let _ = writeln!(
        text,
        "Leverage : {:.0}x-{:.0}x (SL {:.2}%)",
        signal.leverage.min, signal.leverage.max, signal.stop_pct
    );
    let _ = writeln!(text, "Entry valid for : {}", format.validity());
    let _ = writeln!(text, "Tier : {} (score {})", signal.tier, signal.score);
    let _ = writeln!(
        text,
        "HTF : {} {} / {} · {} {}",
        format.slow_interval, ctx.slow_trend, ctx.slow_position, format.fast_interval, ctx.fast_position
    );
    text.push_str(&risk_hint(signal.stop_pct));
    text
}

/// Position size for a fixed-percentage risk: `risk% / stop%` of the balance.
fn risk_hint(stop_pct: f64) -> String {
    if stop_pct <= 0.0 {
        return "Risk calc: stop distance is zero, sizing example skipped.".to_string();
    }
    let multiple = EXAMPLE_RISK_PCT / stop_pct;
    format!(
        "Risk calc ({EXAMPLE_RISK_PCT:.0}% risk):\n\
         • SL {stop_pct:.2}% → position ≈ {multiple:.2}× balance\n\
         • {EXAMPLE_BALANCE_USDT:.0} USDT balance → position ≈ {:.0} USDT",
        multiple * EXAMPLE_BALANCE_USDT
    )
}
