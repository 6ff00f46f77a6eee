//! Per-channel outbound endpoints: cached in memory, persisted in the store,
//! created on the platform on first need.

use std::{collections::HashMap, sync::Arc};

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::{
    domain::{ChannelId, Endpoint},
    locks::KeyedLocks,
    ports::{EndpointStore, RelayPlatform},
    Result,
};

/// Identity new endpoints are created with.
#[derive(Clone, Debug, Default)]
pub struct EndpointProfile {
    pub name: String,
    pub avatar: Option<Vec<u8>>,
}

pub struct EndpointCache {
    platform: Arc<dyn RelayPlatform>,
    store: Arc<dyn EndpointStore>,
    profile: EndpointProfile,
    cache: RwLock<HashMap<ChannelId, Endpoint>>,
    // Creation is not idempotent on the platform: one creator per channel at a time.
    creating: KeyedLocks<ChannelId>,
}

impl EndpointCache {
    pub fn new(
        platform: Arc<dyn RelayPlatform>,
        store: Arc<dyn EndpointStore>,
        profile: EndpointProfile,
    ) -> Self {
        Self {
            platform,
            store,
            profile,
            cache: RwLock::new(HashMap::new()),
            creating: KeyedLocks::default(),
        }
    }

    pub async fn cached(&self, channel: ChannelId) -> Option<Endpoint> {
        self.cache.read().await.get(&channel).cloned()
    }

    /// Cached endpoint, else the persisted one (if the platform still knows
    /// it), else a freshly created one.
    pub async fn get_or_create(&self, channel: ChannelId) -> Result<Endpoint> {
        if let Some(ep) = self.cached(channel).await {
            return Ok(ep);
        }

        let _guard = self.creating.lock(&channel).await;
        if let Some(ep) = self.cached(channel).await {
            return Ok(ep);
        }

        let ep = match self.store.get(channel).await? {
            Some(stored) => match self.platform.fetch_endpoint(channel, &stored.url).await? {
                Some(live) => live,
                None => {
                    info!(channel = %channel, "stored endpoint no longer exists, creating a new one");
                    self.create_and_persist(channel).await?
                }
            },
            None => {
                info!(channel = %channel, "no endpoint for channel, creating one");
                self.create_and_persist(channel).await?
            }
        };

        self.cache.write().await.insert(channel, ep.clone());
        Ok(ep)
    }

    /// Replace the channel's endpoint with a new one.
    ///
    /// `stale` is the endpoint the caller saw fail. If the cache already holds
    /// something else, another caller has recreated it and that endpoint is
    /// returned as is. `None` forces creation.
    pub async fn recreate(&self, channel: ChannelId, stale: Option<&Endpoint>) -> Result<Endpoint> {
        let _guard = self.creating.lock(&channel).await;

        if let Some(stale) = stale {
            if let Some(current) = self.cached(channel).await {
                if &current != stale {
                    debug!(channel = %channel, "endpoint already recreated");
                    return Ok(current);
                }
            }
        }

        let ep = self.create_and_persist(channel).await?;
        self.cache.write().await.insert(channel, ep.clone());
        info!(channel = %channel, "endpoint recreated");
        Ok(ep)
    }

    /// Drop the in-memory entry only.
    pub async fn invalidate(&self, channel: ChannelId) {
        self.cache.write().await.remove(&channel);
    }

    /// Delete the channel's endpoint on the platform (best effort), in the
    /// store and in the cache.
    pub async fn discard(&self, channel: ChannelId) -> Result<()> {
        let _guard = self.creating.lock(&channel).await;

        let cached = self.cache.write().await.remove(&channel);
        let known = match cached {
            Some(ep) => Some(ep),
            None => self.store.get(channel).await?,
        };
        if let Some(ep) = known {
            if let Err(e) = self.platform.delete_endpoint(&ep).await {
                warn!(channel = %channel, error = %e, "failed to delete endpoint on platform");
            }
        }
        self.store.delete(channel).await?;
        Ok(())
    }

    async fn create_and_persist(&self, channel: ChannelId) -> Result<Endpoint> {
        let ep = self
            .platform
            .create_endpoint(channel, &self.profile.name, self.profile.avatar.as_deref())
            .await?;

        if let Err(e) = self.store.upsert(&ep).await {
            // Unpersisted endpoints would be recreated on every restart.
            if let Err(del) = self.platform.delete_endpoint(&ep).await {
                warn!(channel = %channel, error = %del, "failed to roll back endpoint creation");
            }
            return Err(e);
        }
        Ok(ep)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        store::{memory_pool, SqliteEndpointStore},
        testing::FakePlatform,
    };
    use std::time::Duration;

    const CH: ChannelId = ChannelId(42);

    async fn setup() -> (Arc<FakePlatform>, Arc<SqliteEndpointStore>, Arc<EndpointCache>) {
        let platform = Arc::new(FakePlatform::default());
        let store = Arc::new(SqliteEndpointStore::new(memory_pool().await));
        let cache = Arc::new(EndpointCache::new(
            platform.clone(),
            store.clone(),
            EndpointProfile {
                name: "relay - Link".to_string(),
                avatar: None,
            },
        ));
        (platform, store, cache)
    }

    #[tokio::test]
    async fn creates_once_then_serves_from_cache() {
        let (platform, store, cache) = setup().await;

        let first = cache.get_or_create(CH).await.unwrap();
        let second = cache.get_or_create(CH).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(platform.create_calls(), 1);
        assert_eq!(store.get(CH).await.unwrap(), Some(first));
    }

    #[tokio::test]
    async fn loads_persisted_endpoint_without_creating() {
        let (platform, store, cache) = setup().await;
        let stored = Endpoint {
            channel_id: CH,
            url: "hook://42/stored".to_string(),
        };
        store.upsert(&stored).await.unwrap();

        assert_eq!(cache.get_or_create(CH).await.unwrap(), stored);
        assert_eq!(platform.create_calls(), 0);
    }

    #[tokio::test]
    async fn revoked_persisted_endpoint_is_replaced() {
        let (platform, store, cache) = setup().await;
        let stored = Endpoint {
            channel_id: CH,
            url: "hook://42/stored".to_string(),
        };
        store.upsert(&stored).await.unwrap();
        platform.revoke(&stored.url);

        let ep = cache.get_or_create(CH).await.unwrap();
        assert_ne!(ep, stored);
        assert_eq!(platform.create_calls(), 1);
        assert_eq!(store.get(CH).await.unwrap(), Some(ep));
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_creation() {
        let (platform, _store, cache) = setup().await;
        *platform.create_delay.lock().unwrap() = Some(Duration::from_millis(30));

        let mut tasks = Vec::new();
        for _ in 0..10 {
            let cache = cache.clone();
            tasks.push(tokio::spawn(async move { cache.get_or_create(CH).await }));
        }
        let mut urls = Vec::new();
        for t in tasks {
            urls.push(t.await.unwrap().unwrap().url);
        }

        assert_eq!(platform.create_calls(), 1);
        assert!(urls.iter().all(|u| u == &urls[0]));
    }

    #[tokio::test]
    async fn recreate_overwrites_cache_and_store() {
        let (platform, store, cache) = setup().await;
        let old = cache.get_or_create(CH).await.unwrap();

        let new = cache.recreate(CH, Some(&old)).await.unwrap();
        assert_ne!(old, new);
        assert_eq!(platform.create_calls(), 2);
        assert_eq!(cache.cached(CH).await, Some(new.clone()));
        assert_eq!(store.get(CH).await.unwrap(), Some(new));
    }

    #[tokio::test]
    async fn recreate_with_outdated_stale_endpoint_reuses_current() {
        let (platform, _store, cache) = setup().await;
        let old = cache.get_or_create(CH).await.unwrap();
        let fresh = cache.recreate(CH, Some(&old)).await.unwrap();

        // A second caller that also saw `old` fail must not create a third endpoint.
        let again = cache.recreate(CH, Some(&old)).await.unwrap();
        assert_eq!(again, fresh);
        assert_eq!(platform.create_calls(), 2);

        cache.recreate(CH, None).await.unwrap();
        assert_eq!(platform.create_calls(), 3);
    }

    #[tokio::test]
    async fn creation_failure_is_propagated_and_nothing_persisted() {
        let (platform, store, cache) = setup().await;
        platform.fail_create_for(CH);

        assert!(cache.get_or_create(CH).await.is_err());
        assert!(store.get(CH).await.unwrap().is_none());
        assert!(cache.cached(CH).await.is_none());
    }

    #[tokio::test]
    async fn invalidate_drops_only_the_cache_entry() {
        let (platform, store, cache) = setup().await;
        let ep = cache.get_or_create(CH).await.unwrap();

        cache.invalidate(CH).await;
        assert!(cache.cached(CH).await.is_none());
        assert_eq!(store.get(CH).await.unwrap(), Some(ep.clone()));

        // Reload comes from the store, not from a new creation.
        assert_eq!(cache.get_or_create(CH).await.unwrap(), ep);
        assert_eq!(platform.create_calls(), 1);
    }

    #[tokio::test]
    async fn discard_removes_everywhere() {
        let (platform, store, cache) = setup().await;
        let ep = cache.get_or_create(CH).await.unwrap();

        cache.discard(CH).await.unwrap();
        assert!(cache.cached(CH).await.is_none());
        assert!(store.get(CH).await.unwrap().is_none());
        assert_eq!(platform.deleted.lock().unwrap().clone(), vec![ep]);
    }
}
