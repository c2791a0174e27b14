use std::collections::{HashMap, HashSet, VecDeque};

use tracing::warn;

use common::{Bar, History, Result};

/// What `CandleBuffer::upsert` did with a bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    /// A bar for a new `open_time` that is still forming.
    Appended,
    /// The in-progress bar was updated and is still forming, or an already
    /// closed bar was overwritten.
    Replaced,
    /// The update produced a newly closed bar. Analysis runs on these only.
    Closed,
    /// Older than the most recent stored bar; dropped.
    Stale,
}

#[derive(Debug, Default)]
struct Series {
    bars: VecDeque<Bar>,
    /// Distinct closed bars observed for the pair. Never decreases.
    closed_count: u64,
}

/// Bounded, ordered bar history per pair.
///
/// Owned by the stream supervisor; nothing else mutates it. Analysis works on
/// `History` copies taken with [`CandleBuffer::snapshot`].
#[derive(Debug)]
pub struct CandleBuffer {
    capacity: usize,
    series: HashMap<String, Series>,
}

impl CandleBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            series: HashMap::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a bar for a new `open_time` or replace the last bar when the
    /// `open_time` matches. Invalid bars are rejected and leave the buffer as is.
    pub fn upsert(&mut self, pair: &str, bar: Bar) -> Result<Upsert> {
        bar.validate()?;

        let series = self.series.entry(pair.to_string()).or_default();
        let outcome = match series.bars.back_mut() {
            Some(last) if bar.open_time < last.open_time => return Ok(Upsert::Stale),
            Some(last) if bar.open_time == last.open_time => {
                let newly_closed = bar.closed && !last.closed;
                *last = bar;
                if newly_closed {
                    Upsert::Closed
                } else {
                    Upsert::Replaced
                }
            }
            _ => {
                series.bars.push_back(bar);
                if bar.closed {
                    Upsert::Closed
                } else {
                    Upsert::Appended
                }
            }
        };

        if outcome == Upsert::Closed {
            series.closed_count += 1;
        }
        while series.bars.len() > self.capacity {
            series.bars.pop_front();
        }
        Ok(outcome)
    }

    /// Replace the pair's history with `bars` (oldest first).
    ///
    /// Bars whose `close_time` is not before `now_ms` are still forming (the
    /// klines endpoint returns the current bar last) and are kept open; the
    /// live feed closes them. Every other bar is marked closed. Invalid or
    /// out-of-order bars are skipped. The closed counter advances by the number
    /// of closed bars newer than the last closed bar stored before. Returns the
    /// number of bars kept.
    pub fn preload(&mut self, pair: &str, bars: Vec<Bar>, now_ms: i64) -> usize {
        let series = self.series.entry(pair.to_string()).or_default();
        let previous_closed = series.bars.iter().rev().find(|b| b.closed).map(|b| b.open_time);

        series.bars.clear();
        let mut skipped = 0usize;
        let mut newer = 0u64;
        for mut bar in bars {
            if bar.validate().is_err()
                || series.bars.back().is_some_and(|last| bar.open_time <= last.open_time)
            {
                skipped += 1;
                continue;
            }
            bar.closed = bar.close_time < now_ms;
            if bar.closed && previous_closed.map_or(true, |t| bar.open_time > t) {
                newer += 1;
            }
            series.bars.push_back(bar);
            if series.bars.len() > self.capacity {
                series.bars.pop_front();
            }
        }

        if skipped > 0 {
            warn!(pair, skipped, "Skipped invalid or unordered bars during preload");
        }
        series.closed_count += newer;
        series.bars.len()
    }

    /// Ordered immutable copy of the pair's history.
    pub fn snapshot(&self, pair: &str) -> Option<History> {
        self.series.get(pair).map(|s| History {
            pair: pair.to_string(),
            bars: s.bars.iter().copied().collect(),
            closed_count: s.closed_count,
        })
    }

    /// Drop every series whose pair is not in `pairs`. Returns how many were dropped.
    pub fn retain_pairs(&mut self, pairs: &[String]) -> usize {
        let keep: HashSet<&str> = pairs.iter().map(String::as_str).collect();
        let before = self.series.len();
        self.series.retain(|pair, _| keep.contains(pair.as_str()));
        before - self.series.len()
    }

    pub fn len(&self, pair: &str) -> usize {
        self.series.get(pair).map_or(0, |s| s.bars.len())
    }

    pub fn closed_count(&self, pair: &str) -> u64 {
        self.series.get(pair).map_or(0, |s| s.closed_count)
    }

    pub fn pair_count(&self) -> usize {
        self.series.len()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use common::Error;

    use super::*;

    /// Preload clock after every fixture bar has closed.
    const LATER: i64 = i64::MAX;

    pub(crate) fn bar(i: i64, close: f64, closed: bool) -> Bar {
        Bar {
            open_time: i * 300_000,
            close_time: i * 300_000 + 299_999,
            open: close - 0.5,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 5.0,
            closed,
        }
    }

    #[test]
    fn appends_in_arrival_order_and_evicts_oldest() {
        let mut buf = CandleBuffer::new(3);
        for i in 0..5 {
            assert_eq!(buf.upsert("btcusdt", bar(i, 100.0 + i as f64, true)).unwrap(), Upsert::Closed);
        }
        let history = buf.snapshot("btcusdt").unwrap();
        let times: Vec<i64> = history.bars.iter().map(|b| b.open_time / 300_000).collect();
        assert_eq!(times, vec![2, 3, 4]);
        assert_eq!(history.closed_count, 5);
    }

    #[test]
    fn same_open_time_replaces_last_bar() {
        let mut buf = CandleBuffer::new(10);
        assert_eq!(buf.upsert("btcusdt", bar(0, 100.0, false)).unwrap(), Upsert::Appended);
        assert_eq!(buf.upsert("btcusdt", bar(0, 101.0, false)).unwrap(), Upsert::Replaced);
        assert_eq!(buf.len("btcusdt"), 1);
        assert_eq!(buf.closed_count("btcusdt"), 0);

        assert_eq!(buf.upsert("btcusdt", bar(0, 102.0, true)).unwrap(), Upsert::Closed);
        let history = buf.snapshot("btcusdt").unwrap();
        assert_eq!(history.bars.len(), 1);
        assert_eq!(history.bars[0].close, 102.0);
        assert_eq!(history.closed_count, 1);

        // repeated close of the same bar is not a new closed bar
        assert_eq!(buf.upsert("btcusdt", bar(0, 102.5, true)).unwrap(), Upsert::Replaced);
        assert_eq!(buf.closed_count("btcusdt"), 1);
    }

    #[test]
    fn stale_bar_is_ignored() {
        let mut buf = CandleBuffer::new(10);
        buf.upsert("btcusdt", bar(5, 100.0, true)).unwrap();
        assert_eq!(buf.upsert("btcusdt", bar(4, 90.0, true)).unwrap(), Upsert::Stale);
        let history = buf.snapshot("btcusdt").unwrap();
        assert_eq!(history.bars.len(), 1);
        assert_eq!(history.bars[0].close, 100.0);
    }

    #[test]
    fn invalid_bar_is_rejected_without_mutation() {
        let mut buf = CandleBuffer::new(10);
        buf.upsert("btcusdt", bar(0, 100.0, true)).unwrap();

        let mut bad = bar(1, 100.0, true);
        bad.high = f64::NAN;
        assert!(matches!(buf.upsert("btcusdt", bad), Err(Error::Parse(_))));

        let mut negative = bar(1, 100.0, true);
        negative.volume = -1.0;
        assert!(buf.upsert("btcusdt", negative).is_err());

        assert_eq!(buf.len("btcusdt"), 1);
        assert_eq!(buf.closed_count("btcusdt"), 1);
    }

    #[test]
    fn preload_replaces_history_and_marks_closed() {
        let mut buf = CandleBuffer::new(300);
        for i in 0..3 {
            buf.upsert("ethusdt", bar(i, 50.0, false)).unwrap();
        }

        let bars: Vec<Bar> = (10..160).map(|i| bar(i, 60.0, false)).collect();
        assert_eq!(buf.preload("ethusdt", bars, LATER), 150);

        let history = buf.snapshot("ethusdt").unwrap();
        assert_eq!(history.bars.len(), 150);
        assert!(history.bars.iter().all(|b| b.closed));
        assert_eq!(history.bars[0].open_time, 10 * 300_000);
        assert_eq!(history.closed_count, 150);
    }

    #[test]
    fn preload_keeps_newest_within_capacity() {
        let mut buf = CandleBuffer::new(100);
        let bars: Vec<Bar> = (0..150).map(|i| bar(i, 60.0, true)).collect();
        assert_eq!(buf.preload("ethusdt", bars, LATER), 100);
        let history = buf.snapshot("ethusdt").unwrap();
        assert_eq!(history.bars[0].open_time, 50 * 300_000);
        assert_eq!(history.bars[99].open_time, 149 * 300_000);
    }

    #[test]
    fn repeated_preload_counts_only_new_bars() {
        let mut buf = CandleBuffer::new(300);
        buf.preload("ethusdt", (0..150).map(|i| bar(i, 60.0, true)).collect(), LATER);
        assert_eq!(buf.closed_count("ethusdt"), 150);

        // overlapping window shifted by 4 bars
        buf.preload("ethusdt", (4..154).map(|i| bar(i, 60.0, true)).collect(), LATER);
        assert_eq!(buf.closed_count("ethusdt"), 154);
        assert_eq!(buf.len("ethusdt"), 150);
    }

    #[test]
    fn forming_bar_from_preload_closes_on_first_live_close() {
        let mut buf = CandleBuffer::new(300);
        // bar 5 opened 1s before the preload ran
        let now = 5 * 300_000 + 1_000;
        assert_eq!(buf.preload("btcusdt", (0..6).map(|i| bar(i, 60.0, true)).collect(), now), 6);
        assert_eq!(buf.closed_count("btcusdt"), 5);
        assert!(!buf.snapshot("btcusdt").unwrap().bars[5].closed);

        assert_eq!(buf.upsert("btcusdt", bar(5, 61.0, true)).unwrap(), Upsert::Closed);
        assert_eq!(buf.closed_count("btcusdt"), 6);

        // refresh one bar later: bar 5 is already counted, bar 6 is forming
        let now = 6 * 300_000 + 1_000;
        buf.preload("btcusdt", (1..7).map(|i| bar(i, 60.0, true)).collect(), now);
        assert_eq!(buf.closed_count("btcusdt"), 6);
        assert_eq!(buf.upsert("btcusdt", bar(6, 62.0, true)).unwrap(), Upsert::Closed);
        assert_eq!(buf.closed_count("btcusdt"), 7);
    }

    #[test]
    fn preload_skips_out_of_order_bars() {
        let mut buf = CandleBuffer::new(300);
        let bars = vec![bar(0, 1.0, true), bar(2, 1.0, true), bar(1, 1.0, true), bar(3, 1.0, true)];
        assert_eq!(buf.preload("xrpusdt", bars, LATER), 3);
    }

    #[test]
    fn retain_pairs_drops_departed_instruments() {
        let mut buf = CandleBuffer::new(10);
        for pair in ["btcusdt", "ethusdt", "solusdt"] {
            buf.upsert(pair, bar(0, 10.0, true)).unwrap();
        }
        let dropped = buf.retain_pairs(&["btcusdt".to_string(), "dogeusdt".to_string()]);
        assert_eq!(dropped, 2);
        assert_eq!(buf.pair_count(), 1);
        assert!(buf.snapshot("ethusdt").is_none());
        assert!(buf.snapshot("btcusdt").is_some());
    }

    #[test]
    fn snapshot_is_detached_from_later_updates() {
        let mut buf = CandleBuffer::new(10);
        buf.upsert("btcusdt", bar(0, 100.0, true)).unwrap();
        let history = buf.snapshot("btcusdt").unwrap();
        buf.upsert("btcusdt", bar(1, 200.0, true)).unwrap();
        assert_eq!(history.bars.len(), 1);
        assert_eq!(history.closed_count, 1);
    }
}
