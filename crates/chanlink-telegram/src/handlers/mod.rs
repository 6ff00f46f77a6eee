//! Telegram update handlers.
//!
//! Messages are either `link`/`help` commands or chat traffic to relay.
//! Callback queries answer confirmation prompts.

use std::sync::Arc;

use teloxide::{
    prelude::*,
    types::{CallbackQuery, Message},
};
use tracing::{debug, warn};

use chanlink_core::{commands::parse_command, relay::RelayOutcome};

use crate::router::AppState;

mod callback;
mod commands;
mod inbound;

pub async fn handle_callback(
    bot: Bot,
    q: CallbackQuery,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    callback::handle_callback(bot, q, state).await
}

pub async fn handle_message(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let text = msg.text().or(msg.caption()).unwrap_or("");
    if let Some((cmd, args)) = parse_command(text, &state.cfg.command_prefix) {
        if commands::is_known(&cmd) {
            // Off the dispatcher queue: `link remove` waits for a button press
            // that arrives as a later update for the same chat.
            tokio::spawn(commands::handle_command(bot, msg, state, cmd, args));
            return Ok(());
        }
    }

    let inbound = match inbound::to_inbound(&bot, &msg).await {
        Some(m) => m,
        None => return Ok(()),
    };

    match state.relay.handle(&inbound).await {
        Ok(RelayOutcome::Dispatched(report)) if !report.all_delivered() => {
            warn!(
                chat_id = msg.chat.id.0,
                failed = report.failed.len(),
                delivered = report.delivered.len(),
                "relay partially failed"
            );
        }
        Ok(outcome) => debug!(chat_id = msg.chat.id.0, ?outcome, "relay done"),
        Err(e) => warn!(chat_id = msg.chat.id.0, error = %e, "relay failed"),
    }
    Ok(())
}
