//! Confirm/Cancel prompt over an inline keyboard.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use teloxide::{
    prelude::*,
    types::{ChatId, InlineKeyboardButton, InlineKeyboardMarkup},
};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use chanlink_core::{
    domain::{ChannelId, UserId},
    errors::Error,
    ports::{Confirmation, ConfirmPrompt},
    Result,
};

pub const CALLBACK_PREFIX: &str = "linkconfirm:";

/// `linkconfirm:{id}:yes|no` -> `(id, answer)`.
pub fn parse_callback_data(data: &str) -> Option<(u64, bool)> {
    let rest = data.strip_prefix(CALLBACK_PREFIX)?;
    let (id, answer) = rest.split_once(':')?;
    let id = id.parse::<u64>().ok()?;
    match answer {
        "yes" => Some((id, true)),
        "no" => Some((id, false)),
        _ => None,
    }
}

fn callback_data(id: u64, yes: bool) -> String {
    format!("{CALLBACK_PREFIX}{id}:{}", if yes { "yes" } else { "no" })
}

struct Waiting {
    requester: UserId,
    tx: oneshot::Sender<bool>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum AnswerOutcome {
    Accepted,
    NotRequester,
    Unknown,
}

/// Prompts waiting for a button press.
#[derive(Default)]
pub struct PendingConfirmations {
    next_id: AtomicU64,
    waiting: Mutex<HashMap<u64, Waiting>>,
}

impl PendingConfirmations {
    pub fn register(&self, requester: UserId) -> (u64, oneshot::Receiver<bool>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = oneshot::channel();
        if let Ok(mut map) = self.waiting.lock() {
            map.insert(id, Waiting { requester, tx });
        }
        (id, rx)
    }

    /// Only the user who asked may answer.
    pub fn answer(&self, id: u64, user: UserId, yes: bool) -> AnswerOutcome {
        let Ok(mut map) = self.waiting.lock() else {
            return AnswerOutcome::Unknown;
        };
        match map.get(&id) {
            None => AnswerOutcome::Unknown,
            Some(w) if w.requester != user => AnswerOutcome::NotRequester,
            Some(_) => {
                if let Some(w) = map.remove(&id) {
                    // The prompt may have just timed out; nothing to do then.
                    let _ = w.tx.send(yes);
                }
                AnswerOutcome::Accepted
            }
        }
    }

    pub fn forget(&self, id: u64) {
        if let Ok(mut map) = self.waiting.lock() {
            map.remove(&id);
        }
    }

    pub fn len(&self) -> usize {
        self.waiting.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct TelegramConfirm {
    bot: Bot,
    timeout: Duration,
    pending: PendingConfirmations,
}

impl TelegramConfirm {
    pub fn new(bot: Bot, timeout: Duration) -> Self {
        Self {
            bot,
            timeout,
            pending: PendingConfirmations::default(),
        }
    }

    pub fn answer(&self, id: u64, user: UserId, yes: bool) -> AnswerOutcome {
        self.pending.answer(id, user, yes)
    }
}

#[async_trait]
impl ConfirmPrompt for TelegramConfirm {
    async fn prompt(
        &self,
        channel: ChannelId,
        requester: UserId,
        text: &str,
    ) -> Result<Confirmation> {
        let (id, rx) = self.pending.register(requester);
        let markup = InlineKeyboardMarkup::new(vec![vec![
            InlineKeyboardButton::callback("Confirm", callback_data(id, true)),
            InlineKeyboardButton::callback("Cancel", callback_data(id, false)),
        ]]);

        let sent = self
            .bot
            .send_message(ChatId(channel.0), text.to_string())
            .reply_markup(markup)
            .await;
        let msg = match sent {
            Ok(m) => m,
            Err(e) => {
                self.pending.forget(id);
                return Err(Error::Platform(format!("telegram error: {e}")));
            }
        };

        let outcome = match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(true)) => Confirmation::Confirmed,
            Ok(Ok(false)) | Ok(Err(_)) => Confirmation::Declined,
            Err(_) => {
                self.pending.forget(id);
                debug!(channel = %channel, "confirmation timed out");
                Confirmation::TimedOut
            }
        };

        // Buttons must not outlive the prompt.
        if let Err(e) = self
            .bot
            .edit_message_reply_markup(msg.chat.id, msg.id)
            .await
        {
            warn!(channel = %channel, error = %e, "failed to clear confirmation buttons");
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_callback_data() {
        assert_eq!(parse_callback_data("linkconfirm:7:yes"), Some((7, true)));
        assert_eq!(parse_callback_data("linkconfirm:7:no"), Some((7, false)));
        assert_eq!(parse_callback_data("linkconfirm:x:yes"), None);
        assert_eq!(parse_callback_data("linkconfirm:7:maybe"), None);
        assert_eq!(parse_callback_data("askuser:7:0"), None);
        assert_eq!(callback_data(3, false), "linkconfirm:3:no");
    }

    #[tokio::test]
    async fn requester_answer_is_delivered() {
        let pending = PendingConfirmations::default();
        let (id, rx) = pending.register(UserId(1));

        assert_eq!(pending.answer(id, UserId(2), true), AnswerOutcome::NotRequester);
        assert_eq!(pending.answer(id, UserId(1), true), AnswerOutcome::Accepted);
        assert!(rx.await.unwrap());
        assert!(pending.is_empty());

        assert_eq!(pending.answer(id, UserId(1), false), AnswerOutcome::Unknown);
    }

    #[tokio::test]
    async fn forgotten_prompt_cannot_be_answered() {
        let pending = PendingConfirmations::default();
        let (a, _rx_a) = pending.register(UserId(1));
        let (b, _rx_b) = pending.register(UserId(1));
        assert_ne!(a, b);

        pending.forget(a);
        assert_eq!(pending.answer(a, UserId(1), true), AnswerOutcome::Unknown);
        assert_eq!(pending.len(), 1);
    }
}
