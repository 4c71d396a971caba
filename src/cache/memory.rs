use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::future::Cache;
use moka::policy::Expiry;

use crate::cache::{CacheError, LinkCache};
use crate::models::CachedLink;

const DEFAULT_CAPACITY: u64 = 10_000;

/// Per-entry expiry derived from the link's own `expires_at`, capped at the
/// cache-wide TTL. An already-expired entry gets the shortest possible TTL.
struct LinkExpiry {
    default_ttl: Duration,
}

impl Expiry<String, CachedLink> for LinkExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CachedLink,
        _created_at: Instant,
    ) -> Option<Duration> {
        match value.expires_at {
            Some(expires_at) => {
                let now = chrono::Utc::now();
                if expires_at <= now {
                    Some(Duration::from_secs(1))
                } else {
                    let remaining = (expires_at - now).num_seconds().max(1) as u64;
                    Some(Duration::from_secs(remaining.min(self.default_ttl.as_secs())))
                }
            }
            None => Some(self.default_ttl),
        }
    }
}

/// In-process fast lookup cache for tests and single-node development.
pub struct MemoryCache {
    inner: Cache<String, CachedLink>,
}

impl MemoryCache {
    #[must_use]
    pub fn new(default_ttl: Duration) -> Self {
        let inner = Cache::builder()
            .max_capacity(DEFAULT_CAPACITY)
            .expire_after(LinkExpiry { default_ttl })
            .build();
        Self { inner }
    }
}

#[async_trait]
impl LinkCache for MemoryCache {
    async fn get(&self, code: &str) -> Result<Option<CachedLink>, CacheError> {
        Ok(self.inner.get(code).await)
    }

    async fn put(&self, code: &str, entry: &CachedLink) -> Result<(), CacheError> {
        self.inner.insert(code.to_string(), entry.clone()).await;
        Ok(())
    }

    async fn invalidate(&self, code: &str) -> Result<(), CacheError> {
        self.inner.invalidate(code).await;
        Ok(())
    }
}
