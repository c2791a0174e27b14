use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::time::Instant;
use tracing::{debug, warn};

use common::{Bar, ContextSnapshot, Error, HistoryProvider, HtfContext, PricePosition, Trend};

use crate::config::ContextSettings;

/// Which of the two context timeframes a snapshot belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timeframe {
    /// Trend and position (default `1h`).
    Slow,
    /// Position only (default `15m`).
    Fast,
}

struct CachedSnapshot {
    fetched_at: Instant,
    snapshot: Arc<ContextSnapshot>,
}

/// Per-(pair, timeframe) TTL cache of higher-timeframe context.
///
/// Entries are swapped whole; a failed refresh keeps serving the last good
/// snapshot. The lock is never held across a fetch, so two concurrent
/// refreshes of one key both fetch and the last writer wins.
pub struct ContextCache {
    provider: Arc<dyn HistoryProvider>,
    settings: ContextSettings,
    entries: RwLock<HashMap<(String, Timeframe), CachedSnapshot>>,
}

impl ContextCache {
    pub fn new(provider: Arc<dyn HistoryProvider>, settings: ContextSettings) -> Self {
        Self {
            provider,
            settings,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Combined slow/fast context for `pair`. Never fails.
    pub async fn get(&self, pair: &str) -> HtfContext {
        let slow = self.snapshot(pair, Timeframe::Slow).await;
        let fast = self.snapshot(pair, Timeframe::Fast).await;
        combine(&slow, &fast)
    }

    /// Cached snapshot when younger than the timeframe's TTL, otherwise a
    /// fresh one. Falls back to the stale entry, then to neutral, on failure.
    pub async fn snapshot(&self, pair: &str, timeframe: Timeframe) -> Arc<ContextSnapshot> {
        let key = (pair.to_string(), timeframe);
        let ttl = self.ttl(timeframe);

        let cached = self
            .entries
            .read()
            .get(&key)
            .map(|e| (e.fetched_at, Arc::clone(&e.snapshot)));

        if let Some((fetched_at, snapshot)) = &cached {
            if fetched_at.elapsed() < ttl {
                return Arc::clone(snapshot);
            }
        }

        let interval = self.interval(timeframe);
        let fetched = self
            .provider
            .historical_bars(pair, interval, self.settings.fetch_limit)
            .await
            .and_then(|bars| {
                if bars.is_empty() {
                    Err(Error::Exchange(format!("no {interval} bars returned")))
                } else {
                    Ok(bars)
                }
            });

        match fetched {
            Ok(bars) => {
                let snapshot = Arc::new(self.build_snapshot(&bars, timeframe));
                debug!(
                    pair,
                    interval,
                    trend = %snapshot.trend,
                    position = %snapshot.position,
                    "Context refreshed"
                );
                self.entries.write().insert(
                    key,
                    CachedSnapshot {
                        fetched_at: Instant::now(),
                        snapshot: Arc::clone(&snapshot),
                    },
                );
                snapshot
            }
            Err(e) => {
                warn!(pair, interval, error = %e, "Context fetch failed");
                match cached {
                    Some((_, snapshot)) => snapshot,
                    None => Arc::new(ContextSnapshot::neutral()),
                }
            }
        }
    }

    /// Drop every entry; the next `get` refetches.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn ttl(&self, timeframe: Timeframe) -> Duration {
        match timeframe {
            Timeframe::Slow => self.settings.slow_ttl(),
            Timeframe::Fast => self.settings.fast_ttl(),
        }
    }

    fn interval(&self, timeframe: Timeframe) -> &str {
        match timeframe {
            Timeframe::Slow => &self.settings.slow_interval,
            Timeframe::Fast => &self.settings.fast_interval,
        }
    }

    fn build_snapshot(&self, bars: &[Bar], timeframe: Timeframe) -> ContextSnapshot {
        let trend = match timeframe {
            Timeframe::Slow => classify_trend(bars),
            Timeframe::Fast => Trend::Range,
        };
        let range = classify_position(bars, self.settings.position_window);
        ContextSnapshot {
            captured_at: Utc::now(),
            trend,
            position: range.position,
            range_high: range.high,
            range_low: range.low,
            last_price: range.last_price,
        }
    }
}

// ─── Classification ─────────────────────────────────────────────────────────

/// Compare first and last sampled swing points (every `max(n/10, 2)`-th bar).
pub fn classify_trend(bars: &[Bar]) -> Trend {
    let n = bars.len();
    if n < 20 {
        return Trend::Range;
    }

    let step = (n / 10).max(2);
    let highs: Vec<f64> = bars.iter().step_by(step).map(|b| b.high).collect();
    let lows: Vec<f64> = bars.iter().step_by(step).map(|b| b.low).collect();
    if highs.len() < 3 || lows.len() < 3 {
        return Trend::Range;
    }

    let (first_h, last_h) = (highs[0], highs[highs.len() - 1]);
    let (first_l, last_l) = (lows[0], lows[lows.len() - 1]);

    if last_h > first_h * 1.01 && last_l > first_l * 1.005 {
        Trend::Up
    } else if last_h < first_h * 0.99 && last_l < first_l * 0.995 {
        Trend::Down
    } else {
        Trend::Range
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangePosition {
    pub position: PricePosition,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub last_price: Option<f64>,
}

/// Locate the latest close inside the trailing `window` bars' high/low range.
pub fn classify_position(bars: &[Bar], window: usize) -> RangePosition {
    let last_price = bars.last().map(|b| b.close);
    if bars.len() < 5 {
        return RangePosition {
            position: PricePosition::Mid,
            high: None,
            low: None,
            last_price,
        };
    }

    let segment = &bars[bars.len().saturating_sub(window)..];
    let high = segment.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);
    let low = segment.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);

    let position = match last_price {
        Some(price) if high > low => {
            let pos = (price - low) / (high - low);
            if pos <= 0.35 {
                PricePosition::Discount
            } else if pos >= 0.65 {
                PricePosition::Premium
            } else {
                PricePosition::Mid
            }
        }
        _ => PricePosition::Mid,
    };

    RangePosition {
        position,
        high: Some(high),
        low: Some(low),
        last_price,
    }
}

/// Long is unfavorable into slow premium in a downtrend, or premium on both
/// timeframes. Short mirrors on discount.
pub fn combine(slow: &ContextSnapshot, fast: &ContextSnapshot) -> HtfContext {
    use PricePosition::{Discount, Premium};

    let favorable_long = !(slow.trend == Trend::Down && slow.position == Premium)
        && !(slow.position == Premium && fast.position == Premium);
    let favorable_short = !(slow.trend == Trend::Up && slow.position == Discount)
        && !(slow.position == Discount && fast.position == Discount);

    HtfContext {
        slow_trend: slow.trend,
        slow_position: slow.position,
        fast_position: fast.position,
        favorable_long,
        favorable_short,
    }
}
