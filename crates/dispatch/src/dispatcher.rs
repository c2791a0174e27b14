use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use common::{Alert, Notifier, RuntimeState, Signal};

use crate::message::{render, MessageFormat};

/// Per-pair markers of the last dispatched signal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct CooldownState {
    last_closed_count: Option<u64>,
    last_sent_at: Option<DateTime<Utc>>,
}

/// Why a signal was not dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suppression {
    /// Fewer than `cooldown_candles` closed bars since the last signal.
    Bars { elapsed: u64 },
    /// Fewer than the cooldown seconds since the last signal.
    Seconds { elapsed: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent,
    Suppressed(Suppression),
    /// Handed to the notifier, which failed. Cooldown markers stay recorded.
    DeliveryFailed,
}

/// Enforces the bar-count and wall-clock cooldowns and hands alerts to the notifier.
///
/// Check-and-record happens under one lock, so two concurrent dispatches for
/// the same pair cannot both pass.
pub struct Dispatcher {
    notifier: Arc<dyn Notifier>,
    runtime: Arc<RuntimeState>,
    cooldown_candles: u64,
    format: MessageFormat,
    state: Mutex<HashMap<String, CooldownState>>,
}

impl Dispatcher {
    pub fn new(
        notifier: Arc<dyn Notifier>,
        runtime: Arc<RuntimeState>,
        cooldown_candles: u64,
        format: MessageFormat,
    ) -> Self {
        Self {
            notifier,
            runtime,
            cooldown_candles,
            format,
            state: Mutex::new(HashMap::new()),
        }
    }

    /// Read-only pre-check so callers can skip analysis for a pair that could
    /// not be dispatched anyway.
    pub fn is_cooling_down(&self, pair: &str, closed_count: u64, now: DateTime<Utc>) -> bool {
        let cooldown_secs = self.runtime.cooldown_seconds();
        self.state
            .lock()
            .get(pair)
            .and_then(|s| self.check(s, closed_count, now, cooldown_secs))
            .is_some()
    }

    /// Apply both cooldowns, record the markers, render and deliver.
    ///
    /// `closed_count` is the pair's closed-bar counter at the trigger bar.
    pub async fn dispatch(
        &self,
        signal: Signal,
        closed_count: u64,
        now: DateTime<Utc>,
    ) -> DispatchOutcome {
        let cooldown_secs = self.runtime.cooldown_seconds();
        {
            let mut state = self.state.lock();
            let entry = state.entry(signal.pair.clone()).or_default();
            if let Some(reason) = self.check(entry, closed_count, now, cooldown_secs) {
                debug!(pair = %signal.pair, ?reason, "Signal suppressed by cooldown");
                return DispatchOutcome::Suppressed(reason);
            }
            entry.last_closed_count = Some(closed_count);
            entry.last_sent_at = Some(now);
        }

        let text = render(&signal, &self.format);
        let alert = Alert { signal, text };
        match self.notifier.deliver(&alert).await {
            Ok(()) => {
                info!(
                    pair = %alert.signal.pair,
                    side = %alert.signal.side,
                    tier = %alert.signal.tier,
                    id = %alert.signal.id,
                    "Alert dispatched"
                );
                DispatchOutcome::Sent
            }
            Err(e) => {
                warn!(pair = %alert.signal.pair, error = %e, "Alert delivery failed");
                DispatchOutcome::DeliveryFailed
            }
        }
    }

    /// Forget cooldown markers for one pair, or for every pair.
    pub fn reset(&self, pair: Option<&str>) {
        let mut state = self.state.lock();
        match pair {
            Some(pair) => {
                state.remove(pair);
            }
            None => state.clear(),
        }
    }

    fn check(
        &self,
        state: &CooldownState,
        closed_count: u64,
        now: DateTime<Utc>,
        cooldown_secs: u64,
    ) -> Option<Suppression> {
        if let Some(last) = state.last_closed_count {
            let elapsed = closed_count.saturating_sub(last);
            if elapsed < self.cooldown_candles {
                return Some(Suppression::Bars { elapsed });
            }
        }
        if let Some(last) = state.last_sent_at {
            let elapsed = (now - last).num_seconds();
            if elapsed < cooldown_secs as i64 {
                return Some(Suppression::Seconds { elapsed });
            }
        }
        None
    }
}
