pub mod memory;
pub mod redis;

use std::fmt;

use async_trait::async_trait;

use crate::models::CachedLink;

pub use memory::MemoryCache;
pub use redis::RedisCache;

#[derive(Debug)]
pub struct CacheError(pub String);

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cache error: {}", self.0)
    }
}

impl std::error::Error for CacheError {}

/// Fast lookup index for the redirect path. Entries always carry status and
/// expiry alongside the destination — the cache is never trusted to serve a
/// bare destination. The durable store stays authoritative: a `put` or `get`
/// failure is survivable, a missed `invalidate` is not, which is why
/// status-changing writes invalidate eagerly instead of waiting out the TTL.
#[async_trait]
pub trait LinkCache: Send + Sync {
    async fn get(&self, code: &str) -> Result<Option<CachedLink>, CacheError>;
    async fn put(&self, code: &str, entry: &CachedLink) -> Result<(), CacheError>;
    async fn invalidate(&self, code: &str) -> Result<(), CacheError>;
}
