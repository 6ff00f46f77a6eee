//! Hexagonal ports.
//!
//! The platform client, the persistence store and the confirmation prompt live
//! behind these traits; adapter crates (and the SQLite stores in this crate)
//! implement them.

use async_trait::async_trait;

use crate::{
    domain::{ChannelId, ChannelInfo, Endpoint, GroupId, RelayPayload, UserId},
    errors::DeliveryError,
    Result,
};

/// Capabilities of a platform implementation.
#[derive(Clone, Copy, Debug)]
pub struct PlatformCapabilities {
    /// Endpoints can post under an arbitrary avatar.
    pub supports_avatars: bool,
    pub supports_tts: bool,
    pub max_content_len: usize,
}

/// Messaging platform operations the relay needs.
#[async_trait]
pub trait RelayPlatform: Send + Sync {
    fn capabilities(&self) -> PlatformCapabilities;

    /// Create a new outbound endpoint in `channel`. Not idempotent.
    async fn create_endpoint(
        &self,
        channel: ChannelId,
        display_name: &str,
        avatar: Option<&[u8]>,
    ) -> Result<Endpoint>;

    /// Look up a persisted endpoint. `Ok(None)` means the platform no longer knows it.
    async fn fetch_endpoint(&self, channel: ChannelId, url: &str) -> Result<Option<Endpoint>>;

    async fn send_via_endpoint(
        &self,
        endpoint: &Endpoint,
        payload: &RelayPayload,
    ) -> std::result::Result<(), DeliveryError>;

    async fn delete_endpoint(&self, endpoint: &Endpoint) -> Result<()>;

    async fn describe_channel(&self, channel: ChannelId) -> Result<ChannelInfo>;
}

/// Answer of a confirmation prompt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Confirmation {
    Confirmed,
    Declined,
    TimedOut,
}

impl Confirmation {
    pub fn is_confirmed(self) -> bool {
        self == Confirmation::Confirmed
    }
}

/// Yes/no interactive prompt shown before destructive operations.
#[async_trait]
pub trait ConfirmPrompt: Send + Sync {
    async fn prompt(&self, channel: ChannelId, requester: UserId, text: &str)
        -> Result<Confirmation>;
}

/// Outcome of [`GroupStore::link`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkResult {
    Linked(GroupId),
    AlreadyLinked(GroupId),
}

impl LinkResult {
    pub fn group(self) -> GroupId {
        match self {
            LinkResult::Linked(g) | LinkResult::AlreadyLinked(g) => g,
        }
    }
}

/// Durable group membership. Every mutation is transactional.
#[async_trait]
pub trait GroupStore: Send + Sync {
    async fn get_group(&self, channel: ChannelId) -> Result<Option<GroupId>>;

    /// Put both channels in one group.
    ///
    /// When they already belong to two different groups only the two channels
    /// move (into the lower-numbered group); the other members stay where they are.
    async fn link(&self, a: ChannelId, b: ChannelId) -> Result<LinkResult>;

    /// Remove the channel from its group. Returns the group it left, if any.
    ///
    /// A group left with fewer than two members is deleted.
    async fn unlink(&self, channel: ChannelId) -> Result<Option<GroupId>>;

    /// Channels sharing the group of `channel`, excluding itself.
    async fn peers_of(&self, channel: ChannelId) -> Result<Vec<ChannelId>>;

    async fn members(&self, group: GroupId) -> Result<Vec<ChannelId>>;

    /// Delete a group; its channel links are removed with it.
    async fn delete_group(&self, group: GroupId) -> Result<bool>;
}

/// Durable endpoint records, one per channel.
#[async_trait]
pub trait EndpointStore: Send + Sync {
    async fn get(&self, channel: ChannelId) -> Result<Option<Endpoint>>;
    async fn upsert(&self, endpoint: &Endpoint) -> Result<()>;
    async fn delete(&self, channel: ChannelId) -> Result<bool>;
}
