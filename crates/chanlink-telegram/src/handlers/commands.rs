use std::sync::Arc;

use teloxide::{
    prelude::*,
    types::{ChatId, ParseMode},
};
use tracing::{info, warn};

use chanlink_core::{
    commands::{LinkReply, LINK_COMMAND},
    domain::{ChannelId, UserId},
};

use crate::{
    escape_html,
    router::{AppState, HELP_COMMAND, START_COMMAND},
};

pub(super) fn is_known(cmd: &str) -> bool {
    matches!(cmd, LINK_COMMAND | HELP_COMMAND | START_COMMAND)
}

/// Code spans in replies are written with backticks.
fn reply_html(text: &str) -> String {
    let escaped = escape_html(text);
    let mut out = String::with_capacity(escaped.len());
    let mut open = false;
    for ch in escaped.chars() {
        if ch == '`' {
            out.push_str(if open { "</code>" } else { "<code>" });
            open = !open;
        } else {
            out.push(ch);
        }
    }
    if open {
        out.push_str("</code>");
    }
    out
}

async fn reply(bot: &Bot, chat: ChatId, text: &str) {
    if let Err(e) = bot
        .send_message(chat, reply_html(text))
        .parse_mode(ParseMode::Html)
        .await
    {
        warn!(chat_id = chat.0, error = %e, "failed to send reply");
    }
}

/// Private chats belong to the user; elsewhere only owners and admins may
/// manage links.
async fn is_privileged(bot: &Bot, msg: &Message) -> bool {
    if msg.chat.is_private() {
        return true;
    }
    if msg.sender_chat().map(|c| c.id) == Some(msg.chat.id) {
        // Anonymous group admin.
        return true;
    }
    let Some(user) = msg.from() else {
        return false;
    };
    match bot.get_chat_member(msg.chat.id, user.id).await {
        Ok(member) => member.kind.is_privileged(),
        Err(e) => {
            warn!(chat_id = msg.chat.id.0, error = %e, "get_chat_member failed");
            false
        }
    }
}

pub(super) async fn handle_command(
    bot: Bot,
    msg: Message,
    state: Arc<AppState>,
    cmd: String,
    args: String,
) {
    let chat = msg.chat.id;
    let prefix = state.cfg.command_prefix.clone();

    if cmd != LINK_COMMAND {
        let usage = LinkReply::Usage { prefix }.to_string();
        let text = format!("I relay messages between linked chats.\n\n{usage}");
        reply(&bot, chat, &text).await;
        return;
    }

    if !is_privileged(&bot, &msg).await {
        reply(&bot, chat, "Only chat administrators can manage links.").await;
        return;
    }

    let requester = msg
        .from()
        .map(|u| UserId(u.id.0 as i64))
        .or_else(|| msg.sender_chat().map(|c| UserId(c.id.0)))
        .unwrap_or(UserId(chat.0));

    info!(chat_id = chat.0, args = %args, "link command");
    match state
        .commands
        .dispatch(ChannelId(chat.0), requester, &args)
        .await
    {
        Ok(r) => reply(&bot, chat, &r.to_string()).await,
        Err(e) => {
            warn!(chat_id = chat.0, error = %e, "link command failed");
            reply(&bot, chat, &format!("Something went wrong: {e}")).await;
        }
    }
}
