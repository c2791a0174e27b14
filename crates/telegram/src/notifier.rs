use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::ChatId;
use tracing::warn;

use common::{Alert, Error, Notifier, Result};

/// Sends each alert to every configured chat.
pub struct TelegramNotifier {
    bot: Bot,
    chat_ids: Vec<ChatId>,
}

impl TelegramNotifier {
    pub fn new(token: impl Into<String>, chat_ids: &[i64]) -> Self {
        Self {
            bot: Bot::new(token),
            chat_ids: chat_ids.iter().map(|&id| ChatId(id)).collect(),
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    /// Fails only when no chat received the alert.
    async fn deliver(&self, alert: &Alert) -> Result<()> {
        let mut delivered = 0usize;
        let mut last_error = None;

        for &chat_id in &self.chat_ids {
            match self.bot.send_message(chat_id, alert.text.as_str()).await {
                Ok(_) => delivered += 1,
                Err(e) => {
                    warn!(chat_id = chat_id.0, pair = %alert.signal.pair, error = %e, "Failed to send Telegram alert");
                    last_error = Some(e.to_string());
                }
            }
        }

        if delivered == 0 {
            return Err(Error::Notify(
                last_error.unwrap_or_else(|| "no Telegram chat ids configured".to_string()),
            ));
        }
        Ok(())
    }
}
