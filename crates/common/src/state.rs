use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::RwLock;

use crate::Tier;

/// Mutable runtime settings shared by the supervisor, the dispatch pipeline
/// and the operator commands. Built once in `main` and passed around in an `Arc`.
#[derive(Debug)]
pub struct RuntimeState {
    min_tier: RwLock<Tier>,
    cooldown_seconds: AtomicU64,
    soft_restart: AtomicBool,
}

impl RuntimeState {
    pub fn new(min_tier: Tier, cooldown_seconds: u64) -> Self {
        Self {
            min_tier: RwLock::new(min_tier),
            cooldown_seconds: AtomicU64::new(cooldown_seconds),
            soft_restart: AtomicBool::new(false),
        }
    }

    pub async fn min_tier(&self) -> Tier {
        *self.min_tier.read().await
    }

    pub async fn set_min_tier(&self, tier: Tier) {
        *self.min_tier.write().await = tier;
    }

    pub fn cooldown_seconds(&self) -> u64 {
        self.cooldown_seconds.load(Ordering::Relaxed)
    }

    pub fn set_cooldown_seconds(&self, secs: u64) {
        self.cooldown_seconds.store(secs, Ordering::Relaxed);
    }

    /// Ask the stream supervisor to tear down the feed and refresh pairs/context.
    pub fn request_soft_restart(&self) {
        self.soft_restart.store(true, Ordering::SeqCst);
    }

    /// Consume a pending soft-restart request. Returns true at most once per request.
    pub fn take_soft_restart(&self) -> bool {
        self.soft_restart.swap(false, Ordering::SeqCst)
    }
}
