use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use common::{History, Signal, Tier};

use crate::config::SniperSettings;
use crate::context::ContextCache;
use crate::detector::SpikeReversalDetector;
use crate::levels::build_levels;
use crate::scoring::{evaluate, QualityGates};
use crate::sweep::detect_liquidity_sweep;

/// Runs the full Spike-Reversal evaluation for one history snapshot:
/// detection, optional strict sweep check, levels, HTF context, scoring.
pub struct SniperAnalyzer {
    detector: SpikeReversalDetector,
    settings: SniperSettings,
    context: Arc<ContextCache>,
}

impl SniperAnalyzer {
    pub fn new(settings: SniperSettings, context: Arc<ContextCache>) -> Self {
        Self {
            detector: SpikeReversalDetector::new(settings.detector.clone()),
            settings,
            context,
        }
    }

    pub fn settings(&self) -> &SniperSettings {
        &self.settings
    }

    /// Return a signal when the latest bar of `history` is a setup that passes
    /// every hard gate and reaches `min_tier`.
    pub async fn analyze(&self, history: &History, min_tier: Tier) -> Option<Signal> {
        let pair = history.pair.as_str();
        let bars = &history.bars;

        let detection = self.detector.detect(bars)?;
        let side = detection.side;

        let sweep_ok = if self.settings.strict_sweep {
            let confirmed =
                detect_liquidity_sweep(bars, side, bars.len() - 1, &self.settings.sweep);
            if !confirmed {
                debug!(pair, %side, "Setup rejected: no liquidity sweep before impulse");
                return None;
            }
            confirmed
        } else {
            detection.sweep_ok
        };

        let levels = build_levels(side, &detection.trigger);
        let scoring = &self.settings.scoring;
        let good_rr = levels.rr_tp2() >= scoring.min_rr_tp2;
        let stop_ok = (0.10..=scoring.max_stop_pct).contains(&levels.stop_pct);

        // Both are hard vetoes; skip the context fetch when either fails.
        if !good_rr || !stop_ok {
            debug!(
                pair,
                %side,
                stop_pct = levels.stop_pct,
                rr_tp2 = levels.rr_tp2(),
                "Setup rejected: risk out of range"
            );
            return None;
        }

        let context = self.context.get(pair).await;
        let detector = &self.settings.detector;
        let gates = QualityGates {
            has_leg: detection.bear_legs >= detector.min_bear_candles
                || detection.bull_legs >= detector.min_bull_candles,
            spike_ok: true,
            sweep_ok,
            htf_ok: context.favorable(side),
            good_rr,
            stop_pct: levels.stop_pct,
        };
        let quality = evaluate(&gates, scoring.max_stop_pct, min_tier);

        if !quality.should_send {
            debug!(
                pair,
                %side,
                score = quality.score,
                tier = %quality.tier,
                htf_ok = gates.htf_ok,
                "Setup below sending threshold"
            );
            return None;
        }

        info!(
            pair,
            %side,
            score = quality.score,
            tier = %quality.tier,
            entry = levels.entry,
            stop_pct = levels.stop_pct,
            "Spike-reversal signal"
        );

        Some(Signal {
            id: uuid::Uuid::new_v4().to_string(),
            pair: history.pair.clone(),
            side,
            entry: levels.entry,
            stop: levels.stop,
            targets: levels.targets,
            stop_pct: levels.stop_pct,
            leverage: levels.leverage,
            tier: quality.tier,
            score: quality.score,
            context,
            trigger_open_time: detection.trigger.open_time,
            created_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use common::{Bar, Error, HistoryProvider, HtfContext, Result, Side};

    use super::*;
    use crate::config::ContextSettings;
    use crate::detector::tests::{bar, long_setup, short_setup};

    /// Serves the same bars for every request; `None` fails every request.
    struct StaticHistory(Option<Vec<Bar>>);

    #[async_trait]
    impl HistoryProvider for StaticHistory {
        async fn historical_bars(&self, _pair: &str, _interval: &str, _limit: usize) -> Result<Vec<Bar>> {
            self.0
                .clone()
                .ok_or_else(|| Error::Http("connection refused".into()))
        }
    }

    fn analyzer(settings: SniperSettings, context_bars: Option<Vec<Bar>>) -> SniperAnalyzer {
        let cache = ContextCache::new(Arc::new(StaticHistory(context_bars)), ContextSettings::default());
        SniperAnalyzer::new(settings, Arc::new(cache))
    }

    fn history(bars: Vec<Bar>) -> History {
        History {
            pair: "btcusdt".to_string(),
            closed_count: bars.len() as u64,
            bars,
        }
    }

    #[tokio::test]
    async fn long_setup_with_neutral_context_is_tier_a() {
        let analyzer = analyzer(SniperSettings::default(), None);
        let signal = analyzer
            .analyze(&history(long_setup()), Tier::A)
            .await
            .expect("signal");

        assert_eq!(signal.side, Side::Long);
        assert_eq!(signal.score, 100);
        assert_eq!(signal.tier, Tier::A);
        assert_eq!(signal.context, HtfContext::default());
        assert_eq!(signal.trigger_open_time, 27 * 300_000);
        assert!(signal.stop < signal.entry);
        assert!(signal.targets[0] > signal.entry);
        // stop 0.72% of entry
        assert_eq!(signal.leverage.min, 5.0);
        assert_eq!(signal.leverage.max, 8.0);
    }

    #[tokio::test]
    async fn short_setup_signals_short() {
        let analyzer = analyzer(SniperSettings::default(), None);
        let signal = analyzer
            .analyze(&history(short_setup()), Tier::B)
            .await
            .expect("signal");
        assert_eq!(signal.side, Side::Short);
        assert!(signal.stop > signal.entry);
        assert!(signal.targets.iter().all(|t| *t < signal.entry));
    }

    #[tokio::test]
    async fn minimum_tier_above_score_suppresses() {
        let analyzer = analyzer(SniperSettings::default(), None);
        assert!(analyzer.analyze(&history(long_setup()), Tier::APlus).await.is_none());
    }

    #[tokio::test]
    async fn premium_context_vetoes_long() {
        // rising staircase: slow trend up, both timeframes in premium
        let rising: Vec<Bar> = (0..30)
            .map(|i| {
                let base = 100.0 + i as f64;
                bar(i, base + 0.2, base + 1.0, base, base + 0.5)
            })
            .collect();
        let analyzer = analyzer(SniperSettings::default(), Some(rising));
        assert!(analyzer.analyze(&history(long_setup()), Tier::None).await.is_none());
    }

    #[tokio::test]
    async fn strict_sweep_requires_stop_hunt_wick() {
        let settings = SniperSettings {
            strict_sweep: true,
            ..SniperSettings::default()
        };
        let analyzer = analyzer(settings, None);

        // leg bars have equal wicks, so nothing qualifies as a sweep
        assert!(analyzer.analyze(&history(long_setup()), Tier::A).await.is_none());

        // bar 26 becomes a wide bearish bar with a dominant lower wick
        let mut bars = long_setup();
        bars[26] = bar(26, 97.0, 97.1, 96.1, 96.9);
        let signal = analyzer.analyze(&history(bars), Tier::A).await.expect("signal");
        assert_eq!(signal.side, Side::Long);
    }

    #[tokio::test]
    async fn wide_stop_is_vetoed() {
        let settings = SniperSettings {
            scoring: crate::config::ScoringSettings {
                max_stop_pct: 0.5,
                ..Default::default()
            },
            ..SniperSettings::default()
        };
        let analyzer = analyzer(settings, None);
        assert!(analyzer.analyze(&history(long_setup()), Tier::None).await.is_none());
    }

    #[tokio::test]
    async fn no_setup_is_none() {
        let analyzer = analyzer(SniperSettings::default(), None);
        let flat: Vec<Bar> = (0..40).map(|i| bar(i, 100.0, 100.5, 99.5, 100.0)).collect();
        assert!(analyzer.analyze(&history(flat), Tier::None).await.is_none());
    }
}
