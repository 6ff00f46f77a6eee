use teloxide::{net::Download, prelude::*, types::FileMeta};
use tracing::warn;

use chanlink_core::domain::{Attachment, ChannelId, InboundMessage, UserId};

/// Bot API refuses downloads above 20 MB.
const MAX_DOWNLOAD: u64 = 20 * 1024 * 1024;

/// Who posted a message, as far as loop prevention is concerned.
#[derive(Debug, Default)]
struct AuthorFields<'a> {
    /// `(id, title)` when the message was posted on behalf of a chat.
    sender_chat: Option<(i64, Option<&'a str>)>,
    /// `(id, full name, is_bot)` of the sending user.
    user: Option<(i64, String, bool)>,
    via_bot: bool,
    /// Channel post copied into its discussion group by Telegram.
    automatic_forward: bool,
}

/// `(author id, display name, is_automated)`; `None` without any author.
fn classify_author(f: AuthorFields<'_>) -> Option<(i64, String, bool)> {
    let copied = f.via_bot || f.automatic_forward;
    match (f.sender_chat, f.user) {
        // Anonymous admins and linked channels post as a chat.
        (Some((id, title)), _) => Some((id, title.unwrap_or("Anonymous").to_string(), copied)),
        (None, Some((id, name, is_bot))) => Some((id, name, is_bot || copied)),
        (None, None) => None,
    }
}

/// Turn a Telegram message into the relay's inbound form, downloading its
/// document or photo. `None` when the message has no author.
pub(super) async fn to_inbound(bot: &Bot, msg: &Message) -> Option<InboundMessage> {
    let (author_id, display_name, is_automated) = classify_author(AuthorFields {
        sender_chat: msg.sender_chat().map(|c| (c.id.0, c.title())),
        user: msg
            .from()
            .map(|u| (u.id.0 as i64, u.full_name(), u.is_bot)),
        via_bot: msg.via_bot.is_some(),
        automatic_forward: msg.is_automatic_forward(),
    })?;

    let mut attachments = Vec::new();
    if let Some(doc) = msg.document() {
        let name = doc
            .file_name
            .clone()
            .unwrap_or_else(|| format!("document_{}", msg.id.0));
        let content_type = doc.mime_type.as_ref().map(|m| m.to_string());
        if let Some(a) = download(bot, &doc.file, name, content_type).await {
            attachments.push(a);
        }
    }
    if let Some(largest) = msg.photo().and_then(|sizes| sizes.last()) {
        let name = format!("photo_{}.jpg", msg.id.0);
        if let Some(a) = download(bot, &largest.file, name, Some("image/jpeg".to_string())).await
        {
            attachments.push(a);
        }
    }

    Some(InboundMessage {
        channel_id: ChannelId(msg.chat.id.0),
        author_id: UserId(author_id),
        author_display_name: display_name,
        author_avatar_url: None,
        is_automated,
        content: msg.text().or(msg.caption()).unwrap_or("").to_string(),
        attachments,
        tts: false,
    })
}

async fn download(
    bot: &Bot,
    meta: &FileMeta,
    filename: String,
    content_type: Option<String>,
) -> Option<Attachment> {
    let size = u64::from(meta.size);
    if size > MAX_DOWNLOAD {
        warn!(filename = %filename, size, "attachment too large to relay");
        return None;
    }

    let file = match bot.get_file(meta.id.clone()).await {
        Ok(f) => f,
        Err(e) => {
            warn!(filename = %filename, error = %e, "get_file failed");
            return None;
        }
    };

    let mut data = Vec::with_capacity(size as usize);
    if let Err(e) = bot.download_file(&file.path, &mut data).await {
        warn!(filename = %filename, error = %e, "attachment download failed");
        return None;
    }

    Some(Attachment {
        filename,
        content_type,
        size: data.len() as u64,
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn users_are_relayed_unless_bots() {
        let human = classify_author(AuthorFields {
            user: Some((7, "Ada Lovelace".to_string(), false)),
            ..Default::default()
        });
        assert_eq!(human, Some((7, "Ada Lovelace".to_string(), false)));

        let bot = classify_author(AuthorFields {
            user: Some((8, "helper".to_string(), true)),
            ..Default::default()
        });
        assert_eq!(bot.map(|a| a.2), Some(true));

        let inline = classify_author(AuthorFields {
            user: Some((7, "Ada".to_string(), false)),
            via_bot: true,
            ..Default::default()
        });
        assert_eq!(inline.map(|a| a.2), Some(true));
    }

    #[test]
    fn automatic_forward_of_a_channel_post_is_automated() {
        let copied = classify_author(AuthorFields {
            sender_chat: Some((-100_500, Some("announcements"))),
            user: Some((777000, "Telegram".to_string(), false)),
            automatic_forward: true,
            ..Default::default()
        });
        assert_eq!(copied, Some((-100_500, "announcements".to_string(), true)));
    }

    #[test]
    fn anonymous_admin_posts_are_relayed() {
        let anon = classify_author(AuthorFields {
            sender_chat: Some((-42, None)),
            ..Default::default()
        });
        assert_eq!(anon, Some((-42, "Anonymous".to_string(), false)));
        assert_eq!(classify_author(AuthorFields::default()), None);
    }
}
