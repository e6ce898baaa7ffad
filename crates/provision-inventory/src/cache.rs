//! Cached view of the provider inventory

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::{debug, info, instrument};

use crate::error::InventoryError;
use crate::traits::Inventory;
use crate::types::{Resource, ResourceSpec};

/// Cached listing
#[derive(Debug, Clone)]
struct CachedListing {
    /// Resources as last listed
    resources: Vec<Resource>,
    /// When cached
    cached_at: Instant,
}

/// Inventory front-end with a time-bounded listing cache
///
/// Name lookups are served from the cache until it expires; `refresh` forces
/// a new listing (done after every allocation).
pub struct InventoryCache {
    inventory: Arc<dyn Inventory>,
    listing: RwLock<Option<CachedListing>>,
    ttl: Duration,
    poll_interval: Duration,
}

impl InventoryCache {
    /// Wrap an inventory provider
    pub fn new(inventory: Arc<dyn Inventory>, ttl: Duration) -> Self {
        Self {
            inventory,
            listing: RwLock::new(None),
            ttl,
            poll_interval: Duration::from_secs(5),
        }
    }

    /// Set how often `wait_until_ready` polls
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Create a resource through the provider (never cached)
    ///
    /// # Errors
    /// Propagates the provider's error
    pub async fn create(&self, spec: &ResourceSpec) -> Result<String, InventoryError> {
        self.inventory.create_resource(spec).await
    }

    /// Re-list from the provider and replace the cache
    ///
    /// # Errors
    /// Propagates the provider's error; the previous cache is kept on failure
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> Result<Vec<Resource>, InventoryError> {
        let resources = self.inventory.list_resources().await?;
        info!(
            provider = self.inventory.provider(),
            count = resources.len(),
            "inventory refreshed"
        );
        *self.listing.write().await = Some(CachedListing {
            resources: resources.clone(),
            cached_at: Instant::now(),
        });
        Ok(resources)
    }

    /// Current listing, from cache when fresh
    ///
    /// # Errors
    /// Propagates the provider's error when a refresh is needed
    pub async fn resources(&self) -> Result<Vec<Resource>, InventoryError> {
        if let Some(cached) = self.listing.read().await.as_ref()
            && cached.cached_at.elapsed() <= self.ttl
        {
            debug!("inventory cache hit");
            return Ok(cached.resources.clone());
        }
        self.refresh().await
    }

    /// Find a resource by logical name
    ///
    /// # Errors
    /// Propagates the provider's error when a refresh is needed
    pub async fn find_by_name(&self, name: &str) -> Result<Option<Resource>, InventoryError> {
        Ok(self.resources().await?.into_iter().find(|r| r.name == name))
    }

    /// Poll the provider until the resource reports ready with a public address
    ///
    /// # Errors
    /// Returns `InventoryError::NotReady` when `timeout` elapses first
    #[instrument(skip(self))]
    pub async fn wait_until_ready(
        &self,
        id: &str,
        timeout: Duration,
    ) -> Result<Resource, InventoryError> {
        let start = Instant::now();
        loop {
            let resources = self.refresh().await?;
            if let Some(resource) = resources.into_iter().find(|r| r.id == id)
                && resource.is_ready()
            {
                info!(id, elapsed = ?start.elapsed(), "resource ready");
                return Ok(resource);
            }
            if start.elapsed() >= timeout {
                return Err(InventoryError::NotReady {
                    id: id.to_string(),
                    timeout,
                });
            }
            debug!(id, "resource not ready yet");
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::types::{Addresses, ResourceStatus};

    struct CountingInventory {
        lists: AtomicUsize,
        ready_after: usize,
    }

    #[async_trait]
    impl Inventory for CountingInventory {
        async fn create_resource(&self, _spec: &ResourceSpec) -> Result<String, InventoryError> {
            Ok("7".to_string())
        }

        async fn list_resources(&self) -> Result<Vec<Resource>, InventoryError> {
            let n = self.lists.fetch_add(1, Ordering::SeqCst) + 1;
            let ready = n >= self.ready_after;
            Ok(vec![Resource {
                id: "7".to_string(),
                name: "web-1".to_string(),
                status: if ready {
                    ResourceStatus::Active
                } else {
                    ResourceStatus::New
                },
                addresses: Addresses {
                    public: ready.then(|| "203.0.113.7".parse().unwrap()),
                    ..Addresses::default()
                },
            }])
        }

        fn provider(&self) -> &'static str {
            "counting"
        }
    }

    #[tokio::test]
    async fn test_lookup_uses_cache_until_refresh() {
        let inventory = Arc::new(CountingInventory {
            lists: AtomicUsize::new(0),
            ready_after: 1,
        });
        let cache = InventoryCache::new(inventory.clone(), Duration::from_secs(300));

        assert!(cache.find_by_name("web-1").await.unwrap().is_some());
        assert!(cache.find_by_name("web-9").await.unwrap().is_none());
        assert_eq!(inventory.lists.load(Ordering::SeqCst), 1);

        cache.refresh().await.unwrap();
        assert_eq!(inventory.lists.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_wait_until_ready_polls() {
        let inventory = Arc::new(CountingInventory {
            lists: AtomicUsize::new(0),
            ready_after: 3,
        });
        let cache = InventoryCache::new(inventory.clone(), Duration::from_secs(300))
            .with_poll_interval(Duration::from_millis(1));

        let resource = cache
            .wait_until_ready("7", Duration::from_secs(5))
            .await
            .unwrap();
        assert!(resource.is_ready());
        assert_eq!(inventory.lists.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_wait_until_ready_times_out() {
        let inventory = Arc::new(CountingInventory {
            lists: AtomicUsize::new(0),
            ready_after: usize::MAX,
        });
        let cache = InventoryCache::new(inventory, Duration::from_secs(300))
            .with_poll_interval(Duration::from_millis(1));

        let err = cache
            .wait_until_ready("7", Duration::from_millis(5))
            .await
            .unwrap_err();
        assert!(matches!(err, InventoryError::NotReady { .. }));
    }
}
