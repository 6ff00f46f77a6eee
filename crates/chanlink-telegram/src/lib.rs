//! Telegram adapter (teloxide).
//!
//! Implements the `chanlink-core` relay ports over the Telegram Bot API.
//! Telegram has no webhooks that can post under another identity, so an
//! endpoint here is a verified handle to a chat the bot can write to, and
//! relayed messages carry the author's name as a bold header.

use async_trait::async_trait;
use rand::Rng;
use teloxide::{
    prelude::*,
    types::{ChatId, ChatMemberKind, InputFile, ParseMode, UserId},
    ApiError, RequestError,
};
use tokio::time::sleep;
use tracing::{debug, warn};

pub mod confirm;
pub mod handlers;
pub mod router;

use chanlink_core::{
    domain::{ChannelId, ChannelInfo, Endpoint, RelayPayload},
    errors::{DeliveryError, Error},
    ports::{PlatformCapabilities, RelayPlatform},
    Result,
};

/// Telegram's limit for message text.
pub const MAX_TEXT_LEN: usize = 4096;
/// Telegram's limit for media captions.
pub const MAX_CAPTION_LEN: usize = 1024;

const ENDPOINT_SCHEME: &str = "tg://chat/";

#[derive(Clone)]
pub struct TelegramPlatform {
    bot: Bot,
    bot_id: UserId,
}

impl TelegramPlatform {
    pub fn new(bot: Bot, bot_id: UserId) -> Self {
        Self { bot, bot_id }
    }

    pub fn bot(&self) -> Bot {
        self.bot.clone()
    }

    fn tg_chat(channel: ChannelId) -> ChatId {
        ChatId(channel.0)
    }

    fn map_err(e: RequestError) -> Error {
        Error::Platform(format!("telegram error: {e}"))
    }

    async fn with_retry<T, Fut>(
        &self,
        mut op: impl FnMut() -> Fut,
    ) -> std::result::Result<T, RequestError>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, RequestError>>,
        Fut::IntoFuture: Send,
    {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(RequestError::RetryAfter(d)) if attempts < MAX_RETRIES => {
                    attempts += 1;
                    sleep(d).await;
                }
                Err(other) => return Err(other),
            }
        }
    }

    async fn send_text(&self, chat: ChatId, html: &str) -> std::result::Result<(), RequestError> {
        self.with_retry(|| {
            self.bot
                .send_message(chat, html.to_string())
                .parse_mode(ParseMode::Html)
        })
        .await?;
        Ok(())
    }
}

/// Handle stored for a chat: `tg://chat/<id>/<nonce>`.
pub fn endpoint_url(channel: ChannelId, nonce: u32) -> String {
    format!("{ENDPOINT_SCHEME}{}/{nonce:08x}", channel.0)
}

pub fn parse_endpoint_url(url: &str) -> Option<ChannelId> {
    let rest = url.strip_prefix(ENDPOINT_SCHEME)?;
    let id = rest.split('/').next()?;
    id.parse::<i64>().ok().map(ChannelId)
}

pub fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Author header followed by the message text.
pub fn render_relay_html(payload: &RelayPayload) -> String {
    let header = format!("<b>{}</b>", escape_html(&payload.display_name));
    if payload.content.is_empty() {
        header
    } else {
        format!("{header}\n{}", escape_html(&payload.content))
    }
}

/// Map a Bot API failure onto the relay's delivery error kinds.
pub fn classify(e: &RequestError) -> DeliveryError {
    match e {
        RequestError::Api(api) => match api {
            ApiError::ChatNotFound
            | ApiError::BotKicked
            | ApiError::BotKickedFromSupergroup
            | ApiError::GroupDeactivated => DeliveryError::EndpointGone(api.to_string()),
            ApiError::BotBlocked
            | ApiError::NotEnoughRightsToPostMessages
            | ApiError::UserDeactivated => DeliveryError::Forbidden(api.to_string()),
            ApiError::MessageIsTooLong => DeliveryError::PayloadTooLarge(api.to_string()),
            other => DeliveryError::Other(other.to_string()),
        },
        RequestError::MigrateToChatId(_) => DeliveryError::EndpointGone(e.to_string()),
        RequestError::RetryAfter(_) | RequestError::Network(_) | RequestError::Io(_) => {
            DeliveryError::Transient(e.to_string())
        }
        other => DeliveryError::Other(other.to_string()),
    }
}

/// Once part of a message has reached the chat, a recreate-and-retry would
/// post that part twice, so `EndpointGone` is no longer reported as such.
fn after_partial_delivery(e: DeliveryError, partly_sent: bool) -> DeliveryError {
    match e {
        DeliveryError::EndpointGone(msg) if partly_sent => {
            DeliveryError::Other(format!("endpoint lost mid-message: {msg}"))
        }
        other => other,
    }
}

fn chat_name(chat: &teloxide::types::Chat) -> String {
    if let Some(title) = chat.title() {
        return title.to_string();
    }
    if let Some(username) = chat.username() {
        return username.to_string();
    }
    match (chat.first_name(), chat.last_name()) {
        (Some(first), Some(last)) => format!("{first} {last}"),
        (Some(first), None) => first.to_string(),
        _ => chat.id.0.to_string(),
    }
}

#[async_trait]
impl RelayPlatform for TelegramPlatform {
    fn capabilities(&self) -> PlatformCapabilities {
        PlatformCapabilities {
            supports_avatars: false,
            supports_tts: false,
            max_content_len: MAX_TEXT_LEN,
        }
    }

    async fn create_endpoint(
        &self,
        channel: ChannelId,
        display_name: &str,
        _avatar: Option<&[u8]>,
    ) -> Result<Endpoint> {
        let chat = Self::tg_chat(channel);
        let info = self
            .with_retry(|| self.bot.get_chat(chat))
            .await
            .map_err(Self::map_err)?;

        if !info.is_private() {
            let member = self
                .with_retry(|| self.bot.get_chat_member(chat, self.bot_id))
                .await
                .map_err(Self::map_err)?;
            let can_post = match &member.kind {
                ChatMemberKind::Restricted(r) => r.can_send_messages,
                kind => kind.is_present(),
            };
            if !can_post {
                return Err(Error::Platform(format!(
                    "cannot post in chat {}",
                    chat_name(&info)
                )));
            }
        }

        let url = endpoint_url(channel, rand::rng().random());
        debug!(channel = %channel, name = display_name, "endpoint created");
        Ok(Endpoint {
            channel_id: channel,
            url,
        })
    }

    async fn fetch_endpoint(&self, channel: ChannelId, url: &str) -> Result<Option<Endpoint>> {
        if parse_endpoint_url(url) != Some(channel) {
            return Ok(None);
        }
        match self.with_retry(|| self.bot.get_chat(Self::tg_chat(channel))).await {
            Ok(_) => Ok(Some(Endpoint {
                channel_id: channel,
                url: url.to_string(),
            })),
            Err(e) => match classify(&e) {
                DeliveryError::EndpointGone(_) => Ok(None),
                _ => Err(Self::map_err(e)),
            },
        }
    }

    async fn send_via_endpoint(
        &self,
        endpoint: &Endpoint,
        payload: &RelayPayload,
    ) -> std::result::Result<(), DeliveryError> {
        let Some(channel) = parse_endpoint_url(&endpoint.url) else {
            return Err(DeliveryError::EndpointGone(endpoint.url.clone()));
        };
        let chat = Self::tg_chat(channel);
        let html = render_relay_html(payload);

        let mut attachments = payload.attachments.iter();
        let first = attachments.next();

        // A short text rides along as the caption of the first attachment.
        let caption_used = match first {
            Some(_) if html.chars().count() <= MAX_CAPTION_LEN => true,
            _ => {
                if html.chars().count() > MAX_TEXT_LEN {
                    return Err(DeliveryError::PayloadTooLarge(format!(
                        "{} characters",
                        html.chars().count()
                    )));
                }
                self.send_text(chat, &html).await.map_err(|e| classify(&e))?;
                false
            }
        };

        for (i, att) in first.into_iter().chain(attachments).enumerate() {
            let caption = (i == 0 && caption_used).then(|| html.clone());
            self.with_retry(|| {
                let file = InputFile::memory(att.data.clone()).file_name(att.filename.clone());
                let mut req = self.bot.send_document(chat, file);
                if let Some(c) = &caption {
                    req = req.caption(c.clone()).parse_mode(ParseMode::Html);
                }
                req
            })
            .await
            .map_err(|e| after_partial_delivery(classify(&e), !caption_used || i > 0))?;
        }
        Ok(())
    }

    async fn delete_endpoint(&self, endpoint: &Endpoint) -> Result<()> {
        // Nothing is allocated on Telegram's side.
        debug!(url = %endpoint.url, "endpoint released");
        Ok(())
    }

    async fn describe_channel(&self, channel: ChannelId) -> Result<ChannelInfo> {
        match self.with_retry(|| self.bot.get_chat(Self::tg_chat(channel))).await {
            Ok(chat) => Ok(ChannelInfo {
                id: channel,
                name: chat_name(&chat),
                server: None,
            }),
            Err(e) => {
                warn!(channel = %channel, error = %e, "get_chat failed");
                Err(Self::map_err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(name: &str, content: &str) -> RelayPayload {
        RelayPayload {
            content: content.to_string(),
            attachments: Vec::new(),
            display_name: name.to_string(),
            avatar_url: None,
            tts: false,
        }
    }

    #[test]
    fn endpoint_urls_round_trip_the_chat() {
        let url = endpoint_url(ChannelId(-1001234), 0xbeef);
        assert_eq!(url, "tg://chat/-1001234/0000beef");
        assert_eq!(parse_endpoint_url(&url), Some(ChannelId(-1001234)));
        assert_eq!(parse_endpoint_url("hook://1/2"), None);
        assert_eq!(parse_endpoint_url("tg://chat/abc/1"), None);
    }

    #[test]
    fn relay_html_escapes_author_and_text() {
        assert_eq!(
            render_relay_html(&payload("<Ada>", "1 < 2 & 3")),
            "<b>&lt;Ada&gt;</b>\n1 &lt; 2 &amp; 3"
        );
        assert_eq!(render_relay_html(&payload("Ada", "")), "<b>Ada</b>");
    }

    #[test]
    fn lost_endpoint_after_partial_send_is_not_retryable() {
        let gone = DeliveryError::EndpointGone("chat not found".to_string());
        assert!(after_partial_delivery(gone.clone(), false).is_endpoint_gone());
        assert!(matches!(
            after_partial_delivery(gone, true),
            DeliveryError::Other(_)
        ));
        let forbidden = DeliveryError::Forbidden("blocked".to_string());
        assert_eq!(after_partial_delivery(forbidden.clone(), true), forbidden);
    }

    #[test]
    fn api_errors_are_classified() {
        let gone = classify(&RequestError::Api(ApiError::ChatNotFound));
        assert!(gone.is_endpoint_gone());
        assert!(classify(&RequestError::Api(ApiError::BotKicked)).is_endpoint_gone());
        assert!(matches!(
            classify(&RequestError::Api(ApiError::BotBlocked)),
            DeliveryError::Forbidden(_)
        ));
        assert!(matches!(
            classify(&RequestError::Api(ApiError::NotEnoughRightsToPostMessages)),
            DeliveryError::Forbidden(_)
        ));
        assert!(matches!(
            classify(&RequestError::Api(ApiError::MessageIsTooLong)),
            DeliveryError::PayloadTooLarge(_)
        ));
        assert!(matches!(
            classify(&RequestError::Api(ApiError::Unknown("boom".to_string()))),
            DeliveryError::Other(_)
        ));
    }
}
