use async_trait::async_trait;
use tracing::info;

use common::{Alert, Notifier, Result};

/// Writes alerts to the log instead of a chat. Used with `NOTIFIER=log`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn deliver(&self, alert: &Alert) -> Result<()> {
        info!(
            pair = %alert.signal.pair,
            side = %alert.signal.side,
            tier = %alert.signal.tier,
            "\n{}",
            alert.text
        );
        Ok(())
    }
}
