use async_trait::async_trait;
use redis::{AsyncCommands, aio::MultiplexedConnection};

use crate::cache::{CacheError, LinkCache};
use crate::models::CachedLink;

/// Redis-backed fast lookup cache. Entries are JSON values under a
/// `link:{code}` key with a TTL; invalidation is a plain DEL.
pub struct RedisCache {
    conn: MultiplexedConnection,
    ttl_secs: u64,
}

impl RedisCache {
    #[must_use]
    pub fn new(conn: MultiplexedConnection, ttl_secs: u64) -> Self {
        Self { conn, ttl_secs }
    }

    fn key(code: &str) -> String {
        format!("link:{code}")
    }
}

#[async_trait]
impl LinkCache for RedisCache {
    async fn get(&self, code: &str) -> Result<Option<CachedLink>, CacheError> {
        let mut conn = self.conn.clone();
        let data = conn
            .get::<'_, _, Option<Vec<u8>>>(Self::key(code))
            .await
            .map_err(|err| CacheError(err.to_string()))?;
        match data {
            Some(data) => {
                let entry = serde_json::from_slice::<CachedLink>(&data)
                    .map_err(|err| CacheError(err.to_string()))?;
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }

    async fn put(&self, code: &str, entry: &CachedLink) -> Result<(), CacheError> {
        let data = serde_json::to_vec(entry).map_err(|err| CacheError(err.to_string()))?;
        let mut conn = self.conn.clone();
        conn.set_ex::<'_, _, _, ()>(Self::key(code), data, self.ttl_secs)
            .await
            .map_err(|err| CacheError(err.to_string()))
    }

    async fn invalidate(&self, code: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        conn.del::<'_, _, ()>(Self::key(code))
            .await
            .map_err(|err| CacheError(err.to_string()))
    }
}
