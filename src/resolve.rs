use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::timeout;
use url::Url;
use uuid::Uuid;

use crate::cache::LinkCache;
use crate::error::ServiceError;
use crate::models::{CachedLink, LinkStatus};
use crate::store::LinkStore;

/// A resolvable redirect target.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub link_id: Uuid,
    pub org_id: Uuid,
    pub destination: Url,
}

#[derive(Debug, Clone)]
pub enum Resolution {
    Found(Resolved),
    NotFound,
}

/// The latency-critical read path: cache first, durable store on miss.
///
/// A cache hit whose status is anything but active — or whose expiry has
/// passed — resolves as NotFound without consulting the store; staleness
/// toward blocked/deleted content is handled by eager invalidation on the
/// write side, not here. A cache failure falls through to the store; a store
/// failure (or timeout) fails closed rather than guessing.
#[derive(Clone)]
pub struct RedirectResolver {
    store: Arc<dyn LinkStore>,
    cache: Arc<dyn LinkCache>,
    store_timeout: Duration,
}

impl RedirectResolver {
    #[must_use]
    pub fn new(
        store: Arc<dyn LinkStore>,
        cache: Arc<dyn LinkCache>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            store,
            cache,
            store_timeout,
        }
    }

    pub async fn resolve(&self, code: &str) -> Result<Resolution, ServiceError> {
        let now = Utc::now();

        match self.cache.get(code).await {
            Ok(Some(entry)) => {
                if entry.servable(now) {
                    return Ok(Resolution::Found(Resolved {
                        link_id: entry.link_id,
                        org_id: entry.org_id,
                        destination: entry.destination,
                    }));
                }
                return Ok(Resolution::NotFound);
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(code, error = %err, "cache lookup failed, falling through to store");
            }
        }

        let link = timeout(self.store_timeout, self.store.live_link_by_code(code))
            .await
            .map_err(|_| ServiceError::Storage("store lookup timed out".to_string()))??;
        let Some(link) = link else {
            return Ok(Resolution::NotFound);
        };
        if link.status != LinkStatus::Active || link.is_expired(now) {
            return Ok(Resolution::NotFound);
        }

        // Best-effort refill; the store stays authoritative, so a failed put
        // must not block the response.
        if let Err(err) = self.cache.put(code, &CachedLink::from(&link)).await {
            tracing::warn!(code, error = %err, "cache refill failed");
        }

        Ok(Resolution::Found(Resolved {
            link_id: link.id,
            org_id: link.org_id,
            destination: link.destination,
        }))
    }
}
