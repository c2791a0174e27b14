use std::sync::Arc;

use teloxide::{dispatching::UpdateHandler, prelude::*, utils::command::BotCommands};
use tracing::{info, warn};

use common::{FeedState, RuntimeState, Tier};
use dispatch::Dispatcher as AlertDispatcher;
use engine::SupervisorHandle;

type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Dependencies injected into every handler via `dptree`.
#[derive(Clone)]
pub struct BotDeps {
    pub runtime: Arc<RuntimeState>,
    pub supervisor: SupervisorHandle,
    pub dispatcher: Arc<AlertDispatcher>,
    pub allowed_chat_ids: Arc<Vec<i64>>,
}

/// Telegram bot commands exposed to the operator.
#[derive(BotCommands, Clone, Debug, PartialEq)]
#[command(rename_rule = "lowercase", description = "Sniper bot commands:")]
pub enum Command {
    #[command(description = "Show feed state, universe size and alert settings")]
    Status,
    #[command(description = "Reconnect the feed and reload pairs and context")]
    Restart,
    #[command(description = "Set the minimum tier to send: A+, A or B")]
    MinTier(String),
    #[command(description = "Set the per-pair cooldown in seconds")]
    Cooldown(String),
}

/// Start the Telegram bot in long-polling mode.
pub async fn start_bot(token: String, deps: BotDeps) {
    let bot = Bot::new(token);
    let deps = Arc::new(deps);

    info!("Telegram bot starting (long-polling)");

    Dispatcher::builder(bot, schema())
        .dependencies(dptree::deps![deps])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

fn schema() -> UpdateHandler<Box<dyn std::error::Error + Send + Sync>> {
    use dptree::case;

    let command_handler = teloxide::filter_command::<Command, _>()
        .branch(case![Command::Status].endpoint(handle_status))
        .branch(case![Command::Restart].endpoint(handle_restart))
        .branch(case![Command::MinTier(arg)].endpoint(handle_min_tier))
        .branch(case![Command::Cooldown(arg)].endpoint(handle_cooldown));

    Update::filter_message()
        .map(|msg: Message| msg.chat.id)
        .filter_async(auth_filter)
        .branch(command_handler)
}

/// Silently drop messages from chats not in the allowed list.
async fn auth_filter(chat_id: ChatId, deps: Arc<BotDeps>) -> bool {
    let allowed = deps.allowed_chat_ids.contains(&chat_id.0);
    if !allowed {
        warn!(chat_id = chat_id.0, "Unauthorized Telegram access attempt");
    }
    allowed
}

async fn handle_status(bot: Bot, msg: Message, deps: Arc<BotDeps>) -> HandlerResult {
    let text = status_text(
        deps.supervisor.state().await,
        deps.supervisor.pair_count(),
        deps.runtime.min_tier().await,
        deps.runtime.cooldown_seconds(),
    );
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

async fn handle_restart(bot: Bot, msg: Message, deps: Arc<BotDeps>) -> HandlerResult {
    deps.runtime.request_soft_restart();
    info!(chat_id = msg.chat.id.0, "Soft restart requested");
    bot.send_message(msg.chat.id, "Restart requested. Pairs and context will be reloaded.")
        .await?;
    Ok(())
}

async fn handle_min_tier(bot: Bot, msg: Message, arg: String, deps: Arc<BotDeps>) -> HandlerResult {
    let reply = match parse_min_tier(&arg) {
        Ok(tier) => {
            deps.runtime.set_min_tier(tier).await;
            info!(%tier, "Minimum tier changed");
            format!("Minimum tier set to {tier}.")
        }
        Err(e) => e,
    };
    bot.send_message(msg.chat.id, reply).await?;
    Ok(())
}

async fn handle_cooldown(bot: Bot, msg: Message, arg: String, deps: Arc<BotDeps>) -> HandlerResult {
    let reply = match parse_cooldown(&arg) {
        Ok(secs) => {
            deps.runtime.set_cooldown_seconds(secs);
            // markers recorded under the old cooldown would otherwise keep pairs muted
            deps.dispatcher.reset(None);
            info!(secs, "Cooldown changed");
            format!("Cooldown set to {secs}s. Pair cooldowns cleared.")
        }
        Err(e) => e,
    };
    bot.send_message(msg.chat.id, reply).await?;
    Ok(())
}

// ─── Argument parsing and replies ────────────────────────────────────────────

fn parse_min_tier(arg: &str) -> Result<Tier, String> {
    match arg.parse::<Tier>() {
        Ok(Tier::None) | Err(_) => Err(format!("Usage: /mintier <A+|A|B>, got '{}'", arg.trim())),
        Ok(tier) => Ok(tier),
    }
}

fn parse_cooldown(arg: &str) -> Result<u64, String> {
    arg.trim()
        .parse::<u64>()
        .map_err(|_| format!("Usage: /cooldown <seconds>, got '{}'", arg.trim()))
}

fn status_text(state: FeedState, pairs: usize, min_tier: Tier, cooldown_secs: u64) -> String {
    format!(
        "Sniper Status\n\
         Feed: {state}\n\
         Pairs: {pairs}\n\
         Min tier: {min_tier}\n\
         Cooldown: {cooldown_secs}s"
    )
}
