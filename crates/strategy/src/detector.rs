use common::{Bar, Side};

use crate::config::DetectorSettings;

/// Spike-Reversal detector.
///
/// Classifies the latest bar of a history as a long or short reversal:
/// an impulsive bar that flushes beyond the recent extreme after a run of
/// opposite-direction bars, and closes with only a small opposing wick.
/// Pure: no state, no side effects.
#[derive(Debug, Clone)]
pub struct SpikeReversalDetector {
    pub settings: DetectorSettings,
}

/// Result of a successful detection. Produced fresh per evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub side: Side,
    /// The flush through the window extreme itself counts as a sweep.
    pub sweep_ok: bool,
    pub bear_legs: usize,
    pub bull_legs: usize,
    pub body: f64,
    pub range: f64,
    /// The bar that triggered the setup (last bar of the history).
    pub trigger: Bar,
}

impl SpikeReversalDetector {
    pub fn new(settings: DetectorSettings) -> Self {
        Self { settings }
    }

    /// Evaluate the last bar of `bars` (oldest first).
    /// Returns `None` with fewer than `min_history` bars or when no setup is present.
    pub fn detect(&self, bars: &[Bar]) -> Option<Detection> {
        let s = &self.settings;
        let n = bars.len();
        if n < s.min_history.max(2) {
            return None;
        }

        let last = bars[n - 1];
        let prior = &bars[..n - 1];

        let avg_body = average_body(tail(prior, s.body_lookback));
        if avg_body <= 0.0 {
            return None;
        }

        let body = last.body();
        let range = last.range();
        if range <= 0.0 {
            return None;
        }

        // Impulse gate
        if body < s.min_body_factor * avg_body || body / range < s.min_body_vs_range {
            return None;
        }

        let legs = tail(prior, s.leg_lookback);
        let bear_legs = legs.iter().filter(|b| b.is_bearish()).count();
        let bull_legs = legs.iter().filter(|b| b.is_bullish()).count();

        let window = tail(prior, s.sweep_lookback);
        if window.is_empty() {
            return None;
        }
        let window_low = window.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
        let window_high = window.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);

        // Long wins ties: the short branch is only evaluated when long fails.
        let side = if self.is_long(&last, bear_legs, window_low) {
            Side::Long
        } else if self.is_short(&last, bull_legs, window_high) {
            Side::Short
        } else {
            return None;
        };

        Some(Detection {
            side,
            sweep_ok: true,
            bear_legs,
            bull_legs,
            body,
            range,
            trigger: last,
        })
    }

    fn is_long(&self, last: &Bar, bear_legs: usize, window_low: f64) -> bool {
        last.is_bullish()
            && bear_legs >= self.settings.min_bear_candles
            && last.low < window_low
            && last.upper_wick() / last.range() <= self.settings.max_wick_ratio
    }

    fn is_short(&self, last: &Bar, bull_legs: usize, window_high: f64) -> bool {
        last.is_bearish()
            && bull_legs >= self.settings.min_bull_candles
            && last.high > window_high
            && last.lower_wick() / last.range() <= self.settings.max_wick_ratio
    }
}

/// Last `len` bars of `bars` (all of them when shorter).
fn tail(bars: &[Bar], len: usize) -> &[Bar] {
    &bars[bars.len().saturating_sub(len)..]
}

fn average_body(bars: &[Bar]) -> f64 {
    if bars.is_empty() {
        return 0.0;
    }
    bars.iter().map(Bar::body).sum::<f64>() / bars.len() as f64
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn bar(i: usize, open: f64, high: f64, low: f64, close: f64) -> Bar {
        let open_time = i as i64 * 300_000;
        Bar {
            open_time,
            close_time: open_time + 299_999,
            open,
            high,
            low,
            close,
            volume: 10.0,
            closed: true,
        }
    }

    /// 20 doji bars around 100, a 7-bar bearish leg, then a bullish spike that
    /// flushes below the leg and closes near its high.
    pub(crate) fn long_setup() -> Vec<Bar> {
        let mut bars: Vec<Bar> = (0..20).map(|i| bar(i, 100.0, 100.5, 99.5, 100.0)).collect();
        for k in 0..7 {
            let open = 100.0 - k as f64 * 0.5;
            let close = open - 0.5;
            bars.push(bar(20 + k, open, open + 0.1, close - 0.1, close));
        }
        // body 2.0, range 2.6, upper wick 0.1, low 96.0 < leg low 96.4
        bars.push(bar(27, 96.5, 98.6, 96.0, 98.5));
        bars
    }

    /// Mirror of `long_setup` around 100.
    pub(crate) fn short_setup() -> Vec<Bar> {
        let mut bars: Vec<Bar> = (0..20).map(|i| bar(i, 100.0, 100.5, 99.5, 100.0)).collect();
        for k in 0..7 {
            let open = 100.0 + k as f64 * 0.5;
            let close = open + 0.5;
            bars.push(bar(20 + k, open, close + 0.1, open - 0.1, close));
        }
        bars.push(bar(27, 103.5, 104.0, 101.4, 101.5));
        bars
    }

    fn detector() -> SpikeReversalDetector {
        SpikeReversalDetector::new(DetectorSettings::default())
    }

    #[test]
    fn detects_long_after_bearish_leg_and_flush() {
        let det = detector().detect(&long_setup()).expect("long setup");
        assert_eq!(det.side, Side::Long);
        assert_eq!(det.bear_legs, 7);
        assert_eq!(det.bull_legs, 0);
        assert!(det.sweep_ok);
        assert_eq!(det.trigger.open_time, 27 * 300_000);
    }

    #[test]
    fn detects_short_after_bullish_leg_and_flush() {
        let det = detector().detect(&short_setup()).expect("short setup");
        assert_eq!(det.side, Side::Short);
        assert_eq!(det.bull_legs, 7);
    }

    #[test]
    fn requires_minimum_history() {
        let bars = long_setup();
        assert!(detector().detect(&bars[bars.len() - 24..]).is_none());
        assert!(detector().detect(&[]).is_none());
    }

    #[test]
    fn rejects_spike_that_is_not_impulsive() {
        let mut bars = long_setup();
        let last = bars.len() - 1;
        // body 0.2 is below 2x the trailing average body
        bars[last] = bar(27, 96.3, 96.6, 96.0, 96.5);
        assert!(detector().detect(&bars).is_none());
    }

    #[test]
    fn rejects_long_with_large_upper_wick() {
        let mut bars = long_setup();
        let last = bars.len() - 1;
        // body 2.0 / range 3.5 passes the body ratio, upper wick 1.0 / 3.5 > 0.25
        bars[last] = bar(27, 96.5, 99.5, 96.0, 98.5);
        assert!(detector().detect(&bars).is_none());
    }

    #[test]
    fn rejects_long_without_flush_below_window() {
        let mut bars = long_setup();
        let last = bars.len() - 1;
        bars[last] = bar(27, 96.5, 98.6, 96.45, 98.5);
        assert!(detector().detect(&bars).is_none());
    }

    #[test]
    fn rejects_long_without_enough_leg_bars() {
        let settings = DetectorSettings {
            min_bear_candles: 8,
            ..DetectorSettings::default()
        };
        assert!(SpikeReversalDetector::new(settings).detect(&long_setup()).is_none());
    }

    #[test]
    fn rejects_spike_with_low_body_to_range_ratio() {
        let mut bars = long_setup();
        let last = bars.len() - 1;
        // body 1.0 is well above 2x avg, but body / range = 1.0 / 2.1 < 0.55
        bars[last] = bar(27, 96.5, 97.6, 95.5, 97.5);
        assert!(detector().detect(&bars).is_none());

        let relaxed = DetectorSettings {
            min_body_vs_range: 0.4,
            ..DetectorSettings::default()
        };
        let det = SpikeReversalDetector::new(relaxed).detect(&bars).expect("long once relaxed");
        assert_eq!(det.side, Side::Long);
    }

    #[test]
    fn rejects_short_with_low_body_to_range_ratio() {
        let mut bars = short_setup();
        let last = bars.len() - 1;
        bars[last] = bar(27, 103.5, 104.5, 102.4, 102.5);
        assert!(detector().detect(&bars).is_none());
    }

    #[test]
    fn rejects_short_with_large_lower_wick() {
        let mut bars = short_setup();
        let last = bars.len() - 1;
        // body 2.0 / range 3.5 passes the body ratio, lower wick 1.0 / 3.5 > 0.25
        bars[last] = bar(27, 103.5, 104.0, 100.5, 101.5);
        assert!(detector().detect(&bars).is_none());
    }

    #[test]
    fn rejects_short_without_flush_above_window() {
        let mut bars = short_setup();
        let last = bars.len() - 1;
        // high 103.55 stays below the leg high 103.6
        bars[last] = bar(27, 103.5, 103.55, 101.4, 101.5);
        assert!(detector().detect(&bars).is_none());
    }

    #[test]
    fn rejects_short_without_enough_leg_bars() {
        let settings = DetectorSettings {
            min_bull_candles: 8,
            ..DetectorSettings::default()
        };
        assert!(SpikeReversalDetector::new(settings).detect(&short_setup()).is_none());
    }

    #[test]
    fn outside_bar_meeting_both_flush_conditions_resolves_long() {
        // Both legs present, and the trigger flushes through both window extremes.
        let settings = DetectorSettings {
            min_bear_candles: 3,
            min_bull_candles: 3,
            ..DetectorSettings::default()
        };
        let mut bars: Vec<Bar> = (0..20).map(|i| bar(i, 100.0, 100.5, 99.5, 100.0)).collect();
        for k in 0..8 {
            let (open, close) = if k % 2 == 0 { (100.2, 99.8) } else { (99.8, 100.2) };
            bars.push(bar(20 + k, open, 100.3, 99.7, close));
        }
        // low 98.0 < 99.5 and high 102.0 > 100.5; body 2.4 / range 4.0, wicks 0.8 each
        bars.push(bar(28, 98.8, 102.0, 98.0, 101.2));

        let det = SpikeReversalDetector::new(settings).detect(&bars).expect("setup");
        assert_eq!(det.side, Side::Long);
        assert!(det.bear_legs >= 3 && det.bull_legs >= 3);
    }

    #[test]
    fn flat_history_never_signals() {
        let bars: Vec<Bar> = (0..40).map(|i| bar(i, 100.0, 100.5, 99.5, 100.0)).collect();
        assert!(detector().detect(&bars).is_none());
    }
}
