use std::fmt;

/// Platform channel id (numeric; Telegram chat ids are signed).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelId(pub i64);

/// Platform user id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UserId(pub i64);

/// Link group id. Allocated by the store, monotonically increasing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupId(pub i64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outbound relay handle for one channel.
///
/// `url` is whatever the platform needs to post into the channel under an
/// arbitrary display name (a webhook url, or an adapter-specific token).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    pub channel_id: ChannelId,
    pub url: String,
}

/// Human-readable description of a channel, used in command replies.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelInfo {
    pub id: ChannelId,
    pub name: String,
    pub server: Option<String>,
}

impl ChannelInfo {
    /// Fallback when the platform cannot describe the channel anymore.
    pub fn unknown(id: ChannelId) -> Self {
        Self {
            id,
            name: id.to_string(),
            server: None,
        }
    }
}

/// Opaque attachment blob, passed through untouched.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub content_type: Option<String>,
    pub size: u64,
    pub data: Vec<u8>,
}

/// Cross-platform inbound message event.
#[derive(Clone, Debug)]
pub struct InboundMessage {
    pub channel_id: ChannelId,
    pub author_id: UserId,
    pub author_display_name: String,
    pub author_avatar_url: Option<String>,
    pub is_automated: bool,
    pub content: String,
    pub attachments: Vec<Attachment>,
    pub tts: bool,
}

/// What gets posted through a peer's endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelayPayload {
    pub content: String,
    pub attachments: Vec<Attachment>,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub tts: bool,
}

impl RelayPayload {
    pub fn from_message(msg: &InboundMessage) -> Self {
        Self {
            content: msg.content.clone(),
            attachments: msg.attachments.clone(),
            display_name: msg.author_display_name.clone(),
            avatar_url: msg.author_avatar_url.clone(),
            tts: msg.tts,
        }
    }
}
