use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use common::{History, RuntimeState};
use engine::ClosedBarHandler;
use strategy::SniperAnalyzer;

use crate::dispatcher::Dispatcher;

/// Closed-bar handler run by the analysis pool: cooldown pre-check, analysis,
/// then dispatch.
pub struct SignalPipeline {
    analyzer: SniperAnalyzer,
    dispatcher: Arc<Dispatcher>,
    runtime: Arc<RuntimeState>,
}

impl SignalPipeline {
    pub fn new(analyzer: SniperAnalyzer, dispatcher: Arc<Dispatcher>, runtime: Arc<RuntimeState>) -> Self {
        Self {
            analyzer,
            dispatcher,
            runtime,
        }
    }
}

#[async_trait]
impl ClosedBarHandler for SignalPipeline {
    async fn on_closed_bar(&self, history: History) {
        if self
            .dispatcher
            .is_cooling_down(&history.pair, history.closed_count, Utc::now())
        {
            debug!(pair = %history.pair, "Pair in cooldown, analysis skipped");
            return;
        }

        let min_tier = self.runtime.min_tier().await;
        let Some(signal) = self.analyzer.analyze(&history, min_tier).await else {
            return;
        };
        self.dispatcher
            .dispatch(signal, history.closed_count, Utc::now())
            .await;
    }
}
