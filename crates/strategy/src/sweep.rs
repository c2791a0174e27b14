use common::{Bar, Side};

use crate::config::SweepSettings;

/// Bars averaged for the "outsized range" comparison.
const RANGE_BASELINE_BARS: usize = 5;

/// Look for a stop-hunt wick just before the impulse bar at `impulse_index`.
///
/// Scans up to `max_lookback` bars preceding the impulse, nearest first.
/// A long sweep is a bar that pierced lower and closed back up: dominant lower
/// wick and a range well above the baseline of the bars before the window.
/// Short is the mirror on the upper wick.
pub fn detect_liquidity_sweep(
    bars: &[Bar],
    side: Side,
    impulse_index: usize,
    settings: &SweepSettings,
) -> bool {
    if impulse_index <= 2 || bars.len() < 10 || impulse_index >= bars.len() {
        return false;
    }

    let start = impulse_index.saturating_sub(settings.max_lookback);
    let baseline = &bars[start.saturating_sub(RANGE_BASELINE_BARS)..start];
    if baseline.is_empty() {
        return false;
    }
    let avg_range = baseline.iter().map(Bar::range).sum::<f64>() / baseline.len() as f64;

    bars[start..impulse_index]
        .iter()
        .rev()
        .any(|bar| is_sweep_bar(bar, side, avg_range, settings))
}

fn is_sweep_bar(bar: &Bar, side: Side, avg_range: f64, settings: &SweepSettings) -> bool {
    let range = bar.range();
    if range <= 0.0 {
        return false;
    }

    let upper = bar.upper_wick();
    let lower = bar.lower_wick();

    let (pierced, wick_ok) = match side {
        Side::Long => (
            bar.close > bar.low && lower > 0.0,
            lower >= settings.wick_factor * (upper + 1e-9),
        ),
        Side::Short => (
            bar.close < bar.high && upper > 0.0,
            upper >= settings.wick_factor * (lower + 1e-9),
        ),
    };

    pierced && wick_ok && range >= settings.range_factor * avg_range
}
