use std::sync::Arc;

use teloxide::prelude::*;

use chanlink_core::domain::UserId;

use crate::{
    confirm::{parse_callback_data, AnswerOutcome},
    router::AppState,
};

pub async fn handle_callback(
    bot: Bot,
    q: CallbackQuery,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    let cb_id = q.id.clone();
    let data = q.data.clone().unwrap_or_default();

    // Parse callback data: linkconfirm:{id}:{yes|no}
    let Some((id, yes)) = parse_callback_data(&data) else {
        let _ = bot.answer_callback_query(cb_id).await;
        return Ok(());
    };

    let user = UserId(q.from.id.0 as i64);
    let text = match state.confirm.answer(id, user, yes) {
        AnswerOutcome::Accepted if yes => "Confirmed",
        AnswerOutcome::Accepted => "Cancelled",
        AnswerOutcome::NotRequester => "Only the person who asked can answer.",
        AnswerOutcome::Unknown => "This prompt has expired.",
    };

    let _ = bot
        .answer_callback_query(cb_id)
        .text(text.to_string())
        .await;
    Ok(())
}
