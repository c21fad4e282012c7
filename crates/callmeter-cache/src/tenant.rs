//! Cache-aside tenant profile provider
//!
//! Wraps any [`TenantConfigProvider`] and keeps a short-lived copy of each
//! organization's profile in Redis. Cache failures never fail an event: the
//! inner provider is consulted instead.

use crate::{keys, RedisCache};
use async_trait::async_trait;
use callmeter_core::{models::BillingProfile, traits::TenantConfigProvider, AppResult};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Tenant profile provider with Redis caching
pub struct CachedTenantConfig {
    inner: Arc<dyn TenantConfigProvider>,
    cache: RedisCache,
    ttl_secs: u64,
}

impl CachedTenantConfig {
    pub fn new(inner: Arc<dyn TenantConfigProvider>, cache: RedisCache, ttl_secs: u64) -> Self {
        Self {
            inner,
            cache,
            ttl_secs: if ttl_secs == 0 {
                keys::TENANT_PROFILE_TTL_SECS
            } else {
                ttl_secs
            },
        }
    }

    /// Try to get the profile from cache
    async fn get_from_cache(&self, org_id: &str) -> Option<BillingProfile> {
        let key = keys::tenant_profile_key(org_id);

        match self.cache.get_json::<BillingProfile>(&key).await {
            Ok(profile) => profile,
            Err(e) => {
                warn!("Profile cache error for org {}: {}", org_id, e);
                None
            }
        }
    }

    /// Store the profile in cache
    async fn store_in_cache(&self, org_id: &str, profile: &BillingProfile) {
        let key = keys::tenant_profile_key(org_id);

        if let Err(e) = self.cache.set_json(&key, profile, self.ttl_secs).await {
            warn!("Failed to cache profile for org {}: {}", org_id, e);
        }
    }

    /// Drop the cached copy so the next event re-reads the source
    pub async fn invalidate(&self, org_id: &str) -> AppResult<()> {
        self.cache
            .delete(&keys::tenant_profile_key(org_id))
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl TenantConfigProvider for CachedTenantConfig {
    #[instrument(skip(self))]
    async fn profile(&self, org_id: &str) -> AppResult<BillingProfile> {
        if let Some(profile) = self.get_from_cache(org_id).await {
            return Ok(profile);
        }

        debug!("Profile cache MISS for org {}", org_id);
        let profile = self.inner.profile(org_id).await?;
        self.store_in_cache(org_id, &profile).await;

        Ok(profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TenantConfigProvider for CountingProvider {
        async fn profile(&self, _org_id: &str) -> AppResult<BillingProfile> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(BillingProfile {
                rate_per_minute: dec!(12.5),
                ..Default::default()
            })
        }
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_second_read_is_cached() {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into());
        let cache = RedisCache::new(&url).await.unwrap();
        let inner = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
        });
        let provider = CachedTenantConfig::new(inner.clone(), cache, 30);

        provider.invalidate("org-cache-test").await.unwrap();
        let first = provider.profile("org-cache-test").await.unwrap();
        let second = provider.profile("org-cache-test").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.rate_per_minute, dec!(12.5));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }
}
