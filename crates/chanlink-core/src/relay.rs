//! Fan-out of inbound messages to the other channels of their group.

use std::{sync::Arc, time::Duration};

use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use crate::{
    commands::parse_command,
    domain::{ChannelId, Endpoint, InboundMessage, RelayPayload, UserId},
    endpoints::EndpointCache,
    errors::DeliveryError,
    locks::KeyedLocks,
    ports::{GroupStore, RelayPlatform},
    Result,
};

#[derive(Clone, Debug)]
pub struct RelayConfig {
    pub delivery_timeout: Duration,
    pub command_prefix: String,
    /// Command names (without prefix) that are never relayed.
    pub command_names: Vec<String>,
    /// The relay's own user on the platform, if known.
    pub own_user_id: Option<UserId>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            delivery_timeout: Duration::from_secs(10),
            command_prefix: "/".to_string(),
            command_names: Vec::new(),
            own_user_id: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterReason {
    Automated,
    OwnIdentity,
    Command,
    Empty,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RelayReport {
    pub delivered: Vec<ChannelId>,
    /// Peers that only succeeded after their endpoint was recreated.
    pub recreated: Vec<ChannelId>,
    pub failed: Vec<(ChannelId, DeliveryError)>,
}

impl RelayReport {
    pub fn all_delivered(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RelayOutcome {
    Filtered(FilterReason),
    NoPeers,
    Dispatched(RelayReport),
}

pub struct RelayDispatcher {
    groups: Arc<dyn GroupStore>,
    endpoints: Arc<EndpointCache>,
    platform: Arc<dyn RelayPlatform>,
    cfg: RelayConfig,
    sources: KeyedLocks<ChannelId>,
}

impl RelayDispatcher {
    pub fn new(
        groups: Arc<dyn GroupStore>,
        endpoints: Arc<EndpointCache>,
        platform: Arc<dyn RelayPlatform>,
        cfg: RelayConfig,
    ) -> Self {
        Self {
            groups,
            endpoints,
            platform,
            cfg,
            sources: KeyedLocks::default(),
        }
    }

    /// Loop prevention: anything automated or coming from the relay itself is
    /// dropped, as are recognized commands.
    pub fn filter(&self, msg: &InboundMessage) -> Option<FilterReason> {
        if msg.is_automated {
            return Some(FilterReason::Automated);
        }
        if self.cfg.own_user_id == Some(msg.author_id) {
            return Some(FilterReason::OwnIdentity);
        }
        if let Some((name, _)) = parse_command(&msg.content, &self.cfg.command_prefix) {
            if self.cfg.command_names.iter().any(|c| c == &name) {
                return Some(FilterReason::Command);
            }
        }
        if msg.content.trim().is_empty() && msg.attachments.is_empty() {
            return Some(FilterReason::Empty);
        }
        None
    }

    /// Relay one inbound message to every peer of its channel.
    ///
    /// Messages from the same source channel are handled one at a time, in
    /// arrival order. Peers are delivered concurrently and a failing peer never
    /// affects the others.
    pub async fn handle(&self, msg: &InboundMessage) -> Result<RelayOutcome> {
        if let Some(reason) = self.filter(msg) {
            debug!(channel = %msg.channel_id, ?reason, "message not relayed");
            return Ok(RelayOutcome::Filtered(reason));
        }

        let _source = self.sources.lock(&msg.channel_id).await;

        let peers = self.groups.peers_of(msg.channel_id).await?;
        if peers.is_empty() {
            return Ok(RelayOutcome::NoPeers);
        }

        let mut payload = RelayPayload::from_message(msg);
        let caps = self.platform.capabilities();
        if !caps.supports_tts {
            payload.tts = false;
        }
        if !caps.supports_avatars {
            payload.avatar_url = None;
        }

        let len = payload.content.chars().count();
        if len > caps.max_content_len {
            warn!(
                from = %msg.channel_id,
                len,
                max = caps.max_content_len,
                "message too long to relay"
            );
            let err = DeliveryError::PayloadTooLarge(format!(
                "{len} characters, limit is {}",
                caps.max_content_len
            ));
            return Ok(RelayOutcome::Dispatched(RelayReport {
                failed: peers.into_iter().map(|p| (p, err.clone())).collect(),
                ..RelayReport::default()
            }));
        }

        let payload = Arc::new(payload);
        let timeout = self.cfg.delivery_timeout;
        let mut tasks = JoinSet::new();
        for peer in peers {
            let endpoints = self.endpoints.clone();
            let platform = self.platform.clone();
            let payload = payload.clone();
            tasks.spawn(async move {
                let res = match tokio::time::timeout(
                    timeout,
                    deliver(&endpoints, platform.as_ref(), peer, &payload),
                )
                .await
                {
                    Ok(res) => res,
                    Err(_) => Err(DeliveryError::TimedOut(timeout)),
                };
                (peer, res)
            });
        }

        let mut report = RelayReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((peer, Ok(recreated))) => {
                    debug!(from = %msg.channel_id, to = %peer, "message relayed");
                    if recreated {
                        report.recreated.push(peer);
                    }
                    report.delivered.push(peer);
                }
                Ok((peer, Err(e))) => {
                    warn!(from = %msg.channel_id, to = %peer, error = %e, "relay to peer failed");
                    report.failed.push((peer, e));
                }
                Err(e) => error!(from = %msg.channel_id, error = %e, "relay task aborted"),
            }
        }

        report.delivered.sort();
        report.recreated.sort();
        report.failed.sort_by_key(|(peer, _)| *peer);
        Ok(RelayOutcome::Dispatched(report))
    }
}

/// Deliver to one peer. `Ok(true)` when the endpoint had to be recreated first.
async fn deliver(
    endpoints: &EndpointCache,
    platform: &dyn RelayPlatform,
    peer: ChannelId,
    payload: &RelayPayload,
) -> std::result::Result<bool, DeliveryError> {
    let ep = endpoints
        .get_or_create(peer)
        .await
        .map_err(|e| DeliveryError::Unavailable(e.to_string()))?;

    match platform.send_via_endpoint(&ep, payload).await {
        Ok(()) => Ok(false),
        Err(e) if e.is_endpoint_gone() => {
            warn!(to = %peer, error = %e, "endpoint revoked, recreating and retrying once");
            let fresh = recreate(endpoints, peer, &ep).await?;
            platform.send_via_endpoint(&fresh, payload).await?;
            Ok(true)
        }
        Err(e) => Err(e),
    }
}

async fn recreate(
    endpoints: &EndpointCache,
    peer: ChannelId,
    stale: &Endpoint,
) -> std::result::Result<Endpoint, DeliveryError> {
    endpoints
        .recreate(peer, Some(stale))
        .await
        .map_err(|e| DeliveryError::Unavailable(e.to_string()))
}
