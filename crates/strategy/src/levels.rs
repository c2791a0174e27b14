use common::{Bar, LeverageBand, Side};

/// Reward multiples of risk for the three targets.
pub const TARGET_MULTIPLES: [f64; 3] = [1.5, 2.2, 3.0];

/// Fraction of the extreme→mid-body distance used for the entry.
const ENTRY_FRACTION: f64 = 0.2;
/// Stop buffer beyond the wick, as a fraction of the bar range.
const STOP_BUFFER: f64 = 0.15;
/// Minimum risk (fraction of entry) when the computed risk is degenerate.
const MIN_RISK_FRACTION: f64 = 0.003;

/// Trade levels derived from a trigger bar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Levels {
    pub entry: f64,
    pub stop: f64,
    pub targets: [f64; 3],
    pub risk: f64,
    pub stop_pct: f64,
    pub leverage: LeverageBand,
}

impl Levels {
    /// Reward:risk at the second target.
    pub fn rr_tp2(&self) -> f64 {
        if self.risk <= 0.0 {
            return 0.0;
        }
        (self.targets[1] - self.entry).abs() / self.risk
    }
}

/// Entry near the wick extreme, stop just beyond it, targets at fixed R multiples.
pub fn build_levels(side: Side, bar: &Bar) -> Levels {
    let mid_body = bar.mid_body();
    let range = bar.range().max(1e-9);

    let (entry, mut stop) = match side {
        Side::Long => (
            bar.low + ENTRY_FRACTION * (mid_body - bar.low),
            bar.low - STOP_BUFFER * range,
        ),
        Side::Short => (
            bar.high - ENTRY_FRACTION * (bar.high - mid_body),
            bar.high + STOP_BUFFER * range,
        ),
    };

    let mut risk = match side {
        Side::Long => entry - stop,
        Side::Short => stop - entry,
    };
    if risk <= 0.0 {
        risk = entry.abs() * MIN_RISK_FRACTION;
        stop = match side {
            Side::Long => entry - risk,
            Side::Short => entry + risk,
        };
    }

    let targets = TARGET_MULTIPLES.map(|m| match side {
        Side::Long => entry + m * risk,
        Side::Short => entry - m * risk,
    });

    let stop_pct = if entry != 0.0 {
        (risk / entry).abs() * 100.0
    } else {
        0.0
    };

    Levels {
        entry,
        stop,
        targets,
        risk,
        stop_pct,
        leverage: leverage_band(stop_pct),
    }
}

/// Step function from stop distance (percent) to a leverage range.
pub fn leverage_band(stop_pct: f64) -> LeverageBand {
    let (min, max) = if stop_pct.is_nan() || stop_pct <= 0.0 {
        (5.0, 10.0)
    } else if stop_pct <= 0.25 {
        (20.0, 30.0)
    } else if stop_pct <= 0.40 {
        (15.0, 25.0)
    } else if stop_pct <= 0.70 {
        (8.0, 15.0)
    } else if stop_pct <= 1.20 {
        (5.0, 8.0)
    } else {
        (3.0, 5.0)
    };
    LeverageBand { min, max }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::tests::bar;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn long_levels_sit_near_the_low() {
        // mid-body 99.0, range 4.0
        let levels = build_levels(Side::Long, &bar(0, 98.0, 101.0, 97.0, 100.0));
        assert!(approx(levels.entry, 97.0 + 0.2 * 2.0));
        assert!(approx(levels.stop, 97.0 - 0.6));
        assert!(approx(levels.risk, 1.0));
        assert!(approx(levels.targets[0], 97.4 + 1.5));
        assert!(approx(levels.targets[1], 97.4 + 2.2));
        assert!(approx(levels.targets[2], 97.4 + 3.0));
        assert!(approx(levels.stop_pct, 1.0 / 97.4 * 100.0));
        assert!(approx(levels.rr_tp2(), 2.2));
    }

    #[test]
    fn short_levels_mirror_from_the_high() {
        let levels = build_levels(Side::Short, &bar(0, 100.0, 101.0, 97.0, 98.0));
        assert!(approx(levels.entry, 101.0 - 0.2 * 2.0));
        assert!(approx(levels.stop, 101.6));
        assert!(approx(levels.risk, 1.0));
        assert!(levels.targets.iter().all(|t| *t < levels.entry));
        assert!(approx(levels.targets[2], 100.6 - 3.0));
    }

    #[test]
    fn inverted_bar_falls_back_to_minimum_risk() {
        // low above high: entry lands above the stop buffer, risk goes negative
        let levels = build_levels(Side::Long, &bar(0, 50.0, 49.0, 51.0, 50.0));
        assert!(approx(levels.entry, 50.8));
        assert!(approx(levels.risk, 50.8 * 0.003));
        assert!(approx(levels.stop, 50.8 - 50.8 * 0.003));
        assert!(approx(levels.stop_pct, 0.3));
    }

    #[test]
    fn zero_range_bar_keeps_positive_risk() {
        let levels = build_levels(Side::Long, &bar(0, 50.0, 50.0, 50.0, 50.0));
        assert!(levels.risk > 0.0);
        assert!(levels.stop < levels.entry);
    }

    #[test]
    fn leverage_steps_follow_stop_distance() {
        assert_eq!(leverage_band(0.0), LeverageBand { min: 5.0, max: 10.0 });
        assert_eq!(leverage_band(f64::NAN), LeverageBand { min: 5.0, max: 10.0 });
        assert_eq!(leverage_band(0.20), LeverageBand { min: 20.0, max: 30.0 });
        assert_eq!(leverage_band(0.25), LeverageBand { min: 20.0, max: 30.0 });
        assert_eq!(leverage_band(0.30), LeverageBand { min: 15.0, max: 25.0 });
        assert_eq!(leverage_band(0.50), LeverageBand { min: 8.0, max: 15.0 });
        assert_eq!(leverage_band(1.00), LeverageBand { min: 5.0, max: 8.0 });
        assert_eq!(leverage_band(2.00), LeverageBand { min: 3.0, max: 5.0 });
    }
}
