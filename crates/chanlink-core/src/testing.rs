//! Fake ports shared by the unit tests.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    domain::{ChannelId, ChannelInfo, Endpoint, RelayPayload, UserId},
    errors::{DeliveryError, Error},
    ports::{Confirmation, ConfirmPrompt, PlatformCapabilities, RelayPlatform},
    Result,
};

#[derive(Default)]
pub struct FakePlatform {
    pub creates: AtomicUsize,
    pub create_delay: Mutex<Option<Duration>>,
    /// Channels whose endpoint creation fails.
    pub fail_create: Mutex<HashSet<ChannelId>>,
    /// Endpoint urls the platform has revoked.
    pub revoked: Mutex<HashSet<String>>,
    /// Channels where every send is rejected with `Forbidden`.
    pub forbidden: Mutex<HashSet<ChannelId>>,
    /// Channels where sends hang for this long.
    pub slow: Mutex<HashMap<ChannelId, Duration>>,
    pub deleted: Mutex<Vec<Endpoint>>,
    pub sent: Mutex<Vec<(Endpoint, RelayPayload)>>,
    pub names: Mutex<HashMap<ChannelId, (String, String)>>,
}

impl FakePlatform {
    pub fn create_calls(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn revoke(&self, url: &str) {
        self.revoked.lock().unwrap().insert(url.to_string());
    }

    pub fn fail_create_for(&self, channel: ChannelId) {
        self.fail_create.lock().unwrap().insert(channel);
    }

    pub fn forbid(&self, channel: ChannelId) {
        self.forbidden.lock().unwrap().insert(channel);
    }

    pub fn slow_down(&self, channel: ChannelId, d: Duration) {
        self.slow.lock().unwrap().insert(channel, d);
    }

    pub fn name(&self, channel: ChannelId, name: &str, server: &str) {
        self.names
            .lock()
            .unwrap()
            .insert(channel, (name.to_string(), server.to_string()));
    }

    pub fn delivered_to(&self) -> Vec<ChannelId> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(ep, _)| ep.channel_id)
            .collect()
    }

    pub fn sent_payloads(&self) -> Vec<(Endpoint, RelayPayload)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl RelayPlatform for FakePlatform {
    fn capabilities(&self) -> PlatformCapabilities {
        PlatformCapabilities {
            supports_avatars: true,
            supports_tts: true,
            max_content_len: 2000,
        }
    }

    async fn create_endpoint(
        &self,
        channel: ChannelId,
        _display_name: &str,
        _avatar: Option<&[u8]>,
    ) -> Result<Endpoint> {
        let delay = *self.create_delay.lock().unwrap();
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
        if self.fail_create.lock().unwrap().contains(&channel) {
            return Err(Error::Platform(format!("cannot create endpoint in {channel}")));
        }
        let n = self.creates.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Endpoint {
            channel_id: channel,
            url: format!("hook://{channel}/{n}"),
        })
    }

    async fn fetch_endpoint(&self, channel: ChannelId, url: &str) -> Result<Option<Endpoint>> {
        if self.revoked.lock().unwrap().contains(url) {
            return Ok(None);
        }
        Ok(Some(Endpoint {
            channel_id: channel,
            url: url.to_string(),
        }))
    }

    async fn send_via_endpoint(
        &self,
        endpoint: &Endpoint,
        payload: &RelayPayload,
    ) -> std::result::Result<(), DeliveryError> {
        let delay = self.slow.lock().unwrap().get(&endpoint.channel_id).copied();
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
        if self.revoked.lock().unwrap().contains(&endpoint.url) {
            return Err(DeliveryError::EndpointGone(endpoint.url.clone()));
        }
        if self.forbidden.lock().unwrap().contains(&endpoint.channel_id) {
            return Err(DeliveryError::Forbidden("missing permissions".to_string()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((endpoint.clone(), payload.clone()));
        Ok(())
    }

    async fn delete_endpoint(&self, endpoint: &Endpoint) -> Result<()> {
        self.deleted.lock().unwrap().push(endpoint.clone());
        Ok(())
    }

    async fn describe_channel(&self, channel: ChannelId) -> Result<ChannelInfo> {
        let names = self.names.lock().unwrap();
        Ok(match names.get(&channel) {
            Some((name, server)) => ChannelInfo {
                id: channel,
                name: name.clone(),
                server: Some(server.clone()),
            },
            None => ChannelInfo::unknown(channel),
        })
    }
}

/// Confirmation prompt that always answers the same way and records the text.
pub struct FakeConfirm {
    pub answer: Confirmation,
    pub prompts: Mutex<Vec<(ChannelId, UserId, String)>>,
}

impl FakeConfirm {
    pub fn new(answer: Confirmation) -> Self {
        Self {
            answer,
            prompts: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ConfirmPrompt for FakeConfirm {
    async fn prompt(
        &self,
        channel: ChannelId,
        requester: UserId,
        text: &str,
    ) -> Result<Confirmation> {
        self.prompts
            .lock()
            .unwrap()
            .push((channel, requester, text.to_string()));
        Ok(self.answer)
    }
}
