use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use common::{Config, Notifier, NotifierKind, RuntimeState};
use dispatch::{Dispatcher, LogNotifier, MessageFormat, SignalPipeline};
use engine::{
    AnalysisPool, BinanceFeedConnector, BinanceFuturesClient, StreamSupervisor, SupervisorSettings,
};
use strategy::{ContextCache, SniperAnalyzer, SniperSettings};
use telegram_ctrl::{start_bot, BotDeps, TelegramNotifier};

/// In-flight analysis jobs get this long to finish after the feed stops.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(e) = run().await {
        error!(error = %e, "Sniper bot failed to start");
        std::process::exit(1);
    }
}

async fn run() -> common::Result<()> {
    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = Config::from_env()?;
    let settings = SniperSettings::load(&cfg.sniper_config_path)?;
    info!(
        interval = %cfg.interval,
        notifier = ?cfg.notifier,
        min_tier = %cfg.min_tier,
        strict_sweep = settings.strict_sweep,
        "Sniper bot starting"
    );

    // ── Shared state ──────────────────────────────────────────────────────────
    let runtime = Arc::new(RuntimeState::new(cfg.min_tier, cfg.cooldown_seconds));

    // ── Exchange ──────────────────────────────────────────────────────────────
    let rest = Arc::new(BinanceFuturesClient::from_config(&cfg)?);
    let connector = Arc::new(BinanceFeedConnector::from_config(&cfg));

    // ── Notifier (selected by NOTIFIER) ───────────────────────────────────────
    let notifier: Arc<dyn Notifier> = match cfg.notifier {
        NotifierKind::Telegram => {
            info!(chats = cfg.telegram_chat_ids.len(), "Alerts go to Telegram");
            Arc::new(TelegramNotifier::new(cfg.telegram_token.clone(), &cfg.telegram_chat_ids))
        }
        NotifierKind::Log => {
            info!("Alerts go to the log");
            Arc::new(LogNotifier)
        }
    };

    // ── Analysis and dispatch ─────────────────────────────────────────────────
    let context = Arc::new(ContextCache::new(rest.clone(), settings.context.clone()));
    let dispatcher = Arc::new(Dispatcher::new(
        notifier,
        runtime.clone(),
        settings.cooldown_candles,
        MessageFormat::new(&cfg, &settings),
    ));
    let pipeline = SignalPipeline::new(
        SniperAnalyzer::new(settings, context.clone()),
        dispatcher.clone(),
        runtime.clone(),
    );
    let (pool, scheduler) =
        AnalysisPool::spawn(Arc::new(pipeline), cfg.analysis_workers, cfg.analysis_queue);

    // ── Stream supervisor ─────────────────────────────────────────────────────
    let (mut supervisor, handle) = StreamSupervisor::new(
        SupervisorSettings::from_config(&cfg),
        rest.clone(),
        rest,
        connector,
        pool,
        runtime.clone(),
    );
    supervisor.on_refresh(move || context.clear());

    // ── Telegram C2 ───────────────────────────────────────────────────────────
    if cfg.notifier == NotifierKind::Telegram {
        let deps = BotDeps {
            runtime,
            supervisor: handle.clone(),
            dispatcher,
            allowed_chat_ids: Arc::new(cfg.telegram_chat_ids.clone()),
        };
        tokio::spawn(start_bot(cfg.telegram_token.clone(), deps));
    }

    // ── Run until Ctrl-C ──────────────────────────────────────────────────────
    let feed = tokio::spawn(supervisor.run());
    info!("All subsystems started. Waiting for shutdown signal.");

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C, shutting down");
    }
    info!("Shutdown signal received");
    handle.shutdown();

    if let Err(e) = feed.await {
        warn!(error = %e, "Stream supervisor task failed");
    }
    // the supervisor owned the last pool sender; the scheduler drains and exits
    if tokio::time::timeout(DRAIN_TIMEOUT, scheduler).await.is_err() {
        warn!("Analysis jobs still running at exit");
    }
    info!("Sniper bot stopped");
    Ok(())
}
