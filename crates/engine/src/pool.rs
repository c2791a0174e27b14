use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use common::History;

/// One unit of analysis work per closed bar.
#[async_trait]
pub trait ClosedBarHandler: Send + Sync + 'static {
    async fn on_closed_bar(&self, history: History);
}

/// Bounded queue + bounded concurrency for closed-bar analysis.
///
/// `submit` never waits: when the queue is full the job is dropped and
/// counted. A scheduler task pulls jobs and runs each in its own task once a
/// worker permit is free. A panicking job is logged and does not take down
/// the scheduler or other jobs.
#[derive(Clone)]
pub struct AnalysisPool {
    tx: mpsc::Sender<History>,
    dropped: Arc<AtomicU64>,
}

impl AnalysisPool {
    /// Spawn the scheduler. The returned handle finishes once every
    /// `AnalysisPool` clone is dropped, the queue drains and the last running
    /// job completes.
    pub fn spawn(
        handler: Arc<dyn ClosedBarHandler>,
        workers: usize,
        queue: usize,
    ) -> (Self, JoinHandle<()>) {
        let workers = workers.max(1);
        let (tx, rx) = mpsc::channel(queue.max(1));
        let permits = Arc::new(Semaphore::new(workers));
        info!(workers, queue, "Analysis pool started");
        let scheduler = tokio::spawn(schedule(rx, handler, permits, workers));
        (
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            scheduler,
        )
    }

    /// Queue a job. Returns `false` when it was dropped.
    pub fn submit(&self, history: History) -> bool {
        match self.tx.try_send(history) {
            Ok(()) => true,
            Err(TrySendError::Full(history)) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(pair = %history.pair, dropped_total = total, "Analysis queue full, job dropped");
                false
            }
            Err(TrySendError::Closed(history)) => {
                warn!(pair = %history.pair, "Analysis pool closed, job dropped");
                false
            }
        }
    }

    /// Jobs dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

async fn schedule(
    mut rx: mpsc::Receiver<History>,
    handler: Arc<dyn ClosedBarHandler>,
    permits: Arc<Semaphore>,
    workers: usize,
) {
    while let Some(history) = rx.recv().await {
        let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
            break;
        };
        let handler = Arc::clone(&handler);
        tokio::spawn(async move {
            let pair = history.pair.clone();
            let outcome = AssertUnwindSafe(handler.on_closed_bar(history))
                .catch_unwind()
                .await;
            if outcome.is_err() {
                error!(pair = %pair, "Analysis task panicked");
            }
            drop(permit);
        });
    }
    // every permit back means every running job has finished
    let _ = permits.acquire_many(workers as u32).await;
    info!("Analysis pool stopped");
}
