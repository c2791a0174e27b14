use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::{stream, StreamExt};
use tokio::sync::{watch, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use common::{
    Bar, Config, Error, FeedConnector, FeedState, HistoryProvider, Result, RuntimeState,
    UniverseProvider,
};

use crate::binance::parse_kline_event;
use crate::buffer::{CandleBuffer, Upsert};
use crate::pool::AnalysisPool;

/// Feed/session knobs, normally taken from [`Config`].
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub interval: String,
    pub max_pairs: usize,
    pub min_quote_volume: f64,
    pub buffer_capacity: usize,
    pub preload_limit: usize,
    pub preload_concurrency: usize,
    /// A session is torn down and rebuilt (new universe, new preload) this often.
    pub refresh_interval: Duration,
    pub recv_timeout: Duration,
    pub reconnect_delay: Duration,
}

impl SupervisorSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            interval: cfg.interval.clone(),
            max_pairs: cfg.max_pairs,
            min_quote_volume: cfg.min_volume_usdt,
            buffer_capacity: cfg.buffer_capacity,
            preload_limit: cfg.preload_limit,
            preload_concurrency: cfg.preload_concurrency,
            refresh_interval: cfg.refresh_interval,
            recv_timeout: cfg.recv_timeout,
            reconnect_delay: cfg.reconnect_delay,
        }
    }
}

/// Why a streaming session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Shutdown,
    /// Operator asked for a soft restart.
    Restart,
    /// Periodic universe refresh is due.
    Refresh,
    /// Remote closed the feed.
    Closed,
}

/// Cloneable handle for the operator surface and `main`.
#[derive(Clone)]
pub struct SupervisorHandle {
    state: Arc<RwLock<FeedState>>,
    pair_count: Arc<AtomicUsize>,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl SupervisorHandle {
    pub async fn state(&self) -> FeedState {
        *self.state.read().await
    }

    /// Pairs in the current universe.
    pub fn pair_count(&self) -> usize {
        self.pair_count.load(Ordering::Relaxed)
    }

    /// Stop the supervisor after its current step.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// Owns the live feed and the candle buffer.
///
/// Each session: load the universe, prune and preload the buffer, connect,
/// then stream until shutdown, a soft restart, the refresh deadline, a remote
/// close or an error. Errors and closes back off for `reconnect_delay`;
/// restarts and refreshes reconnect immediately and fire `on_refresh`.
pub struct StreamSupervisor {
    settings: SupervisorSettings,
    universe: Arc<dyn UniverseProvider>,
    history: Arc<dyn HistoryProvider>,
    connector: Arc<dyn FeedConnector>,
    pool: AnalysisPool,
    runtime: Arc<RuntimeState>,
    buffer: CandleBuffer,
    state: Arc<RwLock<FeedState>>,
    pair_count: Arc<AtomicUsize>,
    // kept so the watch channel never reports a closed sender
    _shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
    /// Hook called when a session ends for a restart or refresh.
    on_refresh: Option<Box<dyn Fn() + Send + Sync>>,
}

impl StreamSupervisor {
    pub fn new(
        settings: SupervisorSettings,
        universe: Arc<dyn UniverseProvider>,
        history: Arc<dyn HistoryProvider>,
        connector: Arc<dyn FeedConnector>,
        pool: AnalysisPool,
        runtime: Arc<RuntimeState>,
    ) -> (Self, SupervisorHandle) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shutdown_tx = Arc::new(shutdown_tx);
        let state = Arc::new(RwLock::new(FeedState::Stopped));
        let pair_count = Arc::new(AtomicUsize::new(0));

        let handle = SupervisorHandle {
            state: state.clone(),
            pair_count: pair_count.clone(),
            shutdown_tx: shutdown_tx.clone(),
        };

        let supervisor = StreamSupervisor {
            buffer: CandleBuffer::new(settings.buffer_capacity),
            settings,
            universe,
            history,
            connector,
            pool,
            runtime,
            state,
            pair_count,
            _shutdown_tx: shutdown_tx,
            shutdown_rx,
            on_refresh: None,
        };

        (supervisor, handle)
    }

    pub fn on_refresh<F: Fn() + Send + Sync + 'static>(&mut self, f: F) {
        self.on_refresh = Some(Box::new(f));
    }

    /// Run sessions until shutdown. Call from `tokio::spawn`.
    pub async fn run(mut self) {
        info!(interval = %self.settings.interval, "Stream supervisor started");

        while !self.is_shutdown() {
            match self.run_session().await {
                Ok(SessionEnd::Shutdown) => break,
                Ok(end @ (SessionEnd::Restart | SessionEnd::Refresh)) => {
                    info!(reason = ?end, "Session ended, refreshing universe and context");
                    if let Some(hook) = &self.on_refresh {
                        hook();
                    }
                }
                Ok(SessionEnd::Closed) => {
                    warn!("Feed closed by remote, reconnecting");
                    self.backoff().await;
                }
                Err(e) => {
                    warn!(error = %e, delay = ?self.settings.reconnect_delay, "Feed session failed, reconnecting");
                    self.backoff().await;
                }
            }
        }

        self.set_state(FeedState::Stopped).await;
        info!("Stream supervisor stopped");
    }

    async fn run_session(&mut self) -> Result<SessionEnd> {
        self.set_state(FeedState::Connecting).await;
        let pairs = self
            .universe
            .tradable_pairs(self.settings.max_pairs, self.settings.min_quote_volume)
            .await?;
        if pairs.is_empty() {
            return Err(Error::Exchange("no pairs passed the universe filter".into()));
        }
        let pruned = self.buffer.retain_pairs(&pairs);
        self.pair_count.store(pairs.len(), Ordering::Relaxed);
        info!(pairs = pairs.len(), pruned, "Universe loaded");

        let mut shutdown = self.shutdown_rx.clone();
        if *shutdown.borrow_and_update() {
            return Ok(SessionEnd::Shutdown);
        }

        self.set_state(FeedState::Preloading).await;
        tokio::select! {
            _ = shutdown.changed() => return Ok(SessionEnd::Shutdown),
            _ = self.preload(&pairs) => {}
        }

        self.set_state(FeedState::Connecting).await;
        let mut conn = self.connector.connect(&pairs, &self.settings.interval).await?;
        self.set_state(FeedState::Streaming).await;

        let deadline = Instant::now() + self.settings.refresh_interval;
        let recv_timeout = self.settings.recv_timeout;

        loop {
            let received = tokio::select! {
                _ = shutdown.changed() => return Ok(SessionEnd::Shutdown),
                r = tokio::time::timeout(recv_timeout, conn.next_message()) => r,
            };

            match received {
                Err(_) => debug!("No feed message within receive timeout"),
                Ok(None) => return Ok(SessionEnd::Closed),
                Ok(Some(Err(e))) => return Err(e),
                Ok(Some(Ok(text))) => self.handle_message(&text),
            }

            if self.runtime.take_soft_restart() {
                return Ok(SessionEnd::Restart);
            }
            if Instant::now() >= deadline {
                return Ok(SessionEnd::Refresh);
            }
        }
    }

    /// Fetch history for every pair with bounded parallelism. Failed pairs
    /// keep whatever the buffer already holds.
    async fn preload(&mut self, pairs: &[String]) {
        if self.settings.preload_limit == 0 {
            return;
        }

        let interval = self.settings.interval.as_str();
        let limit = self.settings.preload_limit;
        let history = &self.history;
        let results: Vec<(String, Result<Vec<Bar>>)> = stream::iter(pairs.iter().cloned())
            .map(|pair| async move {
                let bars = history.historical_bars(&pair, interval, limit).await;
                (pair, bars)
            })
            .buffer_unordered(self.settings.preload_concurrency.max(1))
            .collect()
            .await;

        let now_ms = Utc::now().timestamp_millis();
        let mut loaded = 0usize;
        let mut failed = 0usize;
        for (pair, result) in results {
            match result {
                Ok(bars) => {
                    self.buffer.preload(&pair, bars, now_ms);
                    loaded += 1;
                }
                Err(e) => {
                    warn!(pair = %pair, error = %e, "Preload failed");
                    failed += 1;
                }
            }
        }
        info!(loaded, failed, limit, "Preload finished");
    }

    /// Parse, upsert, and hand newly closed bars to the analysis pool.
    fn handle_message(&mut self, text: &str) {
        let event = match parse_kline_event(text) {
            Ok(Some(event)) => event,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "Dropping malformed feed message");
                return;
            }
        };
        if !event.interval.is_empty() && event.interval != self.settings.interval {
            debug!(pair = %event.pair, interval = %event.interval, "Ignoring kline of another interval");
            return;
        }

        match self.buffer.upsert(&event.pair, event.bar) {
            Ok(Upsert::Closed) => {
                if let Some(history) = self.buffer.snapshot(&event.pair) {
                    self.pool.submit(history);
                }
            }
            Ok(Upsert::Stale) => {
                debug!(pair = %event.pair, open_time = event.bar.open_time, "Ignoring stale bar");
            }
            Ok(_) => {}
            Err(e) => warn!(pair = %event.pair, error = %e, "Rejected bar"),
        }
    }

    async fn backoff(&mut self) {
        self.set_state(FeedState::Backoff).await;
        let mut shutdown = self.shutdown_rx.clone();
        tokio::select! {
            _ = shutdown.changed() => {}
            _ = tokio::time::sleep(self.settings.reconnect_delay) => {}
        }
    }

    fn is_shutdown(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    async fn set_state(&self, state: FeedState) {
        let mut current = self.state.write().await;
        if *current != state {
            debug!(from = %*current, to = %state, "Feed state change");
            *current = state;
        }
    }
}
