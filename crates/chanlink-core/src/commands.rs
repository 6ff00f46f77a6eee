//! `link create|remove|check`: the user-facing pairing workflow.

use std::{fmt, sync::Arc};

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::{
    domain::{ChannelId, ChannelInfo, UserId},
    endpoints::EndpointCache,
    pairing::{normalize_code, PairingRegistry},
    ports::{ConfirmPrompt, Confirmation, GroupStore, LinkResult, RelayPlatform},
    Result,
};

/// Name of the command group handled by [`LinkCommands`].
pub const LINK_COMMAND: &str = "link";

/// Split `/cmd@botname args...` into `("cmd", "args...")`.
///
/// Returns `None` when `text` does not start with `prefix`.
pub fn parse_command(text: &str, prefix: &str) -> Option<(String, String)> {
    let text = text.trim();
    let body = text.strip_prefix(prefix)?;
    if body.is_empty() || body.starts_with(char::is_whitespace) {
        return None;
    }

    let mut parts = body.splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("");
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first.split('@').next().unwrap_or("").to_lowercase();
    if cmd.is_empty() {
        return None;
    }
    Some((cmd, rest))
}

/// Parsed `link` sub-command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkAction {
    Create { code: Option<String> },
    Remove,
    Check,
}

impl LinkAction {
    /// Parse the arguments following `link`. Anything unknown yields `None`.
    pub fn parse(args: &str) -> Option<Self> {
        let mut parts = args.split_whitespace();
        let sub = parts.next()?.to_lowercase();
        let mut arg = parts.next();
        // `create code: Q7F2K1`, with the value as a separate token.
        if arg.is_some_and(|a| a.eq_ignore_ascii_case("code:")) {
            arg = parts.next();
        }
        let arg = arg.map(|s| s.trim_start_matches("code:").to_string());
        match sub.as_str() {
            "create" => Some(LinkAction::Create {
                code: arg.filter(|c| !c.is_empty()),
            }),
            "remove" => Some(LinkAction::Remove),
            "check" => Some(LinkAction::Check),
            _ => None,
        }
    }
}

/// Outcome of a `link` command, rendered to text by `Display`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkReply {
    CodeIssued {
        code: String,
        replaced: Option<String>,
        prefix: String,
    },
    UnknownCode {
        code: String,
    },
    SelfLink,
    Linked {
        this: ChannelInfo,
        other: ChannelInfo,
    },
    AlreadyLinked {
        this: ChannelInfo,
        other: ChannelInfo,
    },
    NotLinked,
    RemoveCancelled {
        timed_out: bool,
    },
    Removed {
        others: usize,
    },
    Peers(Vec<ChannelInfo>),
    Usage {
        prefix: String,
    },
}

fn channel_label(c: &ChannelInfo) -> String {
    match &c.server {
        Some(server) => format!("#{} from {}", c.name, server),
        None => format!("#{}", c.name),
    }
}

impl fmt::Display for LinkReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkReply::CodeIssued {
                code,
                replaced,
                prefix,
            } => {
                write!(
                    f,
                    "You started setup for linking this channel with others!\n\
                     Use `{prefix}{LINK_COMMAND} create {code}` in another channel to link them together."
                )?;
                if let Some(old) = replaced {
                    write!(f, "\nThe previous code `{old}` is no longer valid.")?;
                }
                Ok(())
            }
            LinkReply::UnknownCode { code } => write!(
                f,
                "There is no channel currently being set up with code `{code}`."
            ),
            LinkReply::SelfLink => write!(
                f,
                "This code was issued in this channel. Use it in another channel to link them."
            ),
            LinkReply::Linked { this, other } => write!(
                f,
                "Successfully linked channels {} and {} together!",
                this.name, other.name
            ),
            LinkReply::AlreadyLinked { this, other } => {
                write!(f, "{} and {} are already linked.", this.name, other.name)
            }
            LinkReply::NotLinked => write!(f, "This channel is not linked to other channels."),
            LinkReply::RemoveCancelled { timed_out: true } => {
                write!(f, "No answer received, the link was kept.")
            }
            LinkReply::RemoveCancelled { timed_out: false } => {
                write!(f, "Cancelled, the link was kept.")
            }
            LinkReply::Removed { others } => write!(
                f,
                "Link between this channel and {others} others removed!"
            ),
            LinkReply::Peers(peers) => {
                write!(
                    f,
                    "This channel is currently linked with {} other channel(s).",
                    peers.len()
                )?;
                for p in peers {
                    write!(f, "\n{}", channel_label(p))?;
                }
                Ok(())
            }
            LinkReply::Usage { prefix } => write!(
                f,
                "Usage:\n\
                 {prefix}{LINK_COMMAND} create - get a pairing code for this channel\n\
                 {prefix}{LINK_COMMAND} create CODE - link this channel with the one that issued CODE\n\
                 {prefix}{LINK_COMMAND} remove - remove this channel from its group\n\
                 {prefix}{LINK_COMMAND} check - list the channels linked with this one"
            ),
        }
    }
}

/// Orchestrates pairing codes, group membership and endpoints for the
/// `link` commands.
pub struct LinkCommands {
    registry: Mutex<PairingRegistry>,
    groups: Arc<dyn GroupStore>,
    endpoints: Arc<EndpointCache>,
    platform: Arc<dyn RelayPlatform>,
    confirm: Arc<dyn ConfirmPrompt>,
    prefix: String,
}

impl LinkCommands {
    pub fn new(
        registry: PairingRegistry,
        groups: Arc<dyn GroupStore>,
        endpoints: Arc<EndpointCache>,
        platform: Arc<dyn RelayPlatform>,
        confirm: Arc<dyn ConfirmPrompt>,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            registry: Mutex::new(registry),
            groups,
            endpoints,
            platform,
            confirm,
            prefix: prefix.into(),
        }
    }

    /// Run `link <args>` issued in `channel` by `requester`.
    pub async fn dispatch(
        &self,
        channel: ChannelId,
        requester: UserId,
        args: &str,
    ) -> Result<LinkReply> {
        match LinkAction::parse(args) {
            Some(LinkAction::Create { code }) => self.create(channel, code.as_deref()).await,
            Some(LinkAction::Remove) => self.remove(channel, requester).await,
            Some(LinkAction::Check) => self.check(channel).await,
            None => Ok(LinkReply::Usage {
                prefix: self.prefix.clone(),
            }),
        }
    }

    /// Without a code: issue one for this channel. With a code: join the
    /// channel that issued it.
    pub async fn create(&self, channel: ChannelId, code: Option<&str>) -> Result<LinkReply> {
        // Endpoint problems surface here, before any group is touched.
        self.endpoints.get_or_create(channel).await?;

        let Some(code) = code else {
            let issued = self.registry.lock().await.issue_code(channel)?;
            info!(channel = %channel, "pairing code issued");
            return Ok(LinkReply::CodeIssued {
                code: issued.code,
                replaced: issued.replaced,
                prefix: self.prefix.clone(),
            });
        };

        let code = normalize_code(code);
        // Held across the link so a code cannot be redeemed twice.
        let mut registry = self.registry.lock().await;
        let Some(other) = registry.resolve(&code) else {
            return Ok(LinkReply::UnknownCode { code });
        };
        if other == channel {
            return Ok(LinkReply::SelfLink);
        }

        let result = self.groups.link(channel, other).await?;
        if let LinkResult::Linked(_) = result {
            registry.consume(&code);
        }
        drop(registry);

        let this = self.describe(channel).await;
        let other = self.describe(other).await;
        Ok(match result {
            LinkResult::Linked(_) => LinkReply::Linked { this, other },
            LinkResult::AlreadyLinked(_) => LinkReply::AlreadyLinked { this, other },
        })
    }

    /// Leave the group after an explicit confirmation.
    pub async fn remove(&self, channel: ChannelId, requester: UserId) -> Result<LinkReply> {
        let peers = self.groups.peers_of(channel).await?;
        if peers.is_empty() {
            return Ok(LinkReply::NotLinked);
        }

        let others = peers.len();
        let text = format!(
            "Do you really want to remove the link between this channel and the {others} others?"
        );
        match self.confirm.prompt(channel, requester, &text).await? {
            Confirmation::Confirmed => {}
            Confirmation::Declined => return Ok(LinkReply::RemoveCancelled { timed_out: false }),
            Confirmation::TimedOut => return Ok(LinkReply::RemoveCancelled { timed_out: true }),
        }

        self.groups.unlink(channel).await?;
        if let Err(e) = self.endpoints.discard(channel).await {
            warn!(channel = %channel, error = %e, "failed to discard endpoint after unlink");
        }
        info!(channel = %channel, others, "link removed");
        Ok(LinkReply::Removed { others })
    }

    pub async fn check(&self, channel: ChannelId) -> Result<LinkReply> {
        let peers = self.groups.peers_of(channel).await?;
        if peers.is_empty() {
            return Ok(LinkReply::NotLinked);
        }
        let mut infos = Vec::with_capacity(peers.len());
        for peer in peers {
            infos.push(self.describe(peer).await);
        }
        Ok(LinkReply::Peers(infos))
    }

    async fn describe(&self, channel: ChannelId) -> ChannelInfo {
        match self.platform.describe_channel(channel).await {
            Ok(info) => info,
            Err(e) => {
                warn!(channel = %channel, error = %e, "cannot describe channel");
                ChannelInfo::unknown(channel)
            }
        }
    }
}
