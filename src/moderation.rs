use std::sync::Arc;

use crate::cache::LinkCache;
use crate::error::ServiceError;
use crate::models::{BlacklistEntry, Link, LinkStatus};
use crate::store::{LinkStore, StoreError};

const INVALIDATE_ATTEMPTS: usize = 3;

/// Status transitions an owner (member of the link's org) may request.
/// Moderation actions (block, unblock) require the admin role.
#[must_use]
pub fn transition_allowed(from: LinkStatus, to: LinkStatus, admin: bool) -> bool {
    use LinkStatus::{Active, Blocked, Deleted, Disabled};
    match (from, to) {
        (Active, Disabled) | (Disabled, Active) => true,
        (Active | Disabled, Blocked) => admin,
        // Blocked is terminal for owners; only an explicit admin unblock
        // re-enters active.
        (Blocked, Active) => admin,
        (Active | Disabled | Blocked, Deleted) => true,
        _ => false,
    }
}

/// Owns the link status state machine and the write-then-invalidate ordering
/// toward the fast lookup cache.
#[derive(Clone)]
pub struct ModerationGate {
    store: Arc<dyn LinkStore>,
    cache: Arc<dyn LinkCache>,
}

impl ModerationGate {
    #[must_use]
    pub fn new(store: Arc<dyn LinkStore>, cache: Arc<dyn LinkCache>) -> Self {
        Self { store, cache }
    }

    /// Applies a single status change. The durable write happens first and is
    /// guarded on the status the caller observed; the cache entry is
    /// invalidated only after the write lands, so a stale entry can never be
    /// repopulated from a state that is about to change.
    pub async fn set_status(
        &self,
        link: &Link,
        to: LinkStatus,
        admin: bool,
    ) -> Result<Link, ServiceError> {
        if link.status == to {
            return Ok(link.clone());
        }
        if !transition_allowed(link.status, to, admin) {
            return Err(ServiceError::Forbidden(format!(
                "transition {} -> {} is not permitted",
                link.status.as_str(),
                to.as_str()
            )));
        }
        let updated = match self.store.transition_link(link.id, &[link.status], to).await {
            Ok(Some(updated)) => updated,
            Ok(None) => {
                return Err(ServiceError::Conflict(
                    "link status changed concurrently".to_string(),
                ));
            }
            Err(StoreError::DuplicateCode) => {
                return Err(ServiceError::Conflict(format!(
                    "short code '{}' was reallocated while the link was blocked",
                    link.short_code
                )));
            }
            Err(err) => return Err(err.into()),
        };
        self.invalidate_with_retry(&updated.short_code).await;
        Ok(updated)
    }

    /// Blacklist fan-out: blocks every live link matching the rule, one
    /// guarded write plus one cache invalidation per link. Re-blocking an
    /// already-blocked link is a no-op, so the fan-out is safely retryable.
    /// Returns the number of links actually transitioned.
    pub async fn block_destination(&self, entry: &BlacklistEntry) -> Result<u64, ServiceError> {
        let matches = self.store.live_links_matching(entry).await?;
        let mut affected = 0u64;
        for link in matches {
            match self
                .store
                .transition_link(
                    link.id,
                    &[LinkStatus::Active, LinkStatus::Disabled],
                    LinkStatus::Blocked,
                )
                .await
            {
                Ok(Some(_)) => {
                    affected += 1;
                    self.invalidate_with_retry(&link.short_code).await;
                }
                Ok(None) => {
                    // Lost a race with another moderator or a delete.
                    tracing::debug!(link_id = %link.id, "block fan-out skipped a settled link");
                }
                Err(err) => return Err(err.into()),
            }
        }
        tracing::info!(
            destination = %entry.destination,
            match_type = ?entry.match_type,
            affected,
            "destination blocked"
        );
        Ok(affected)
    }

    /// Invalidation after a status change is not best-effort: retry a few
    /// times, then log at error level so operators see the stale key.
    async fn invalidate_with_retry(&self, code: &str) {
        for attempt in 1..=INVALIDATE_ATTEMPTS {
            match self.cache.invalidate(code).await {
                Ok(()) => return,
                Err(err) => {
                    tracing::warn!(code, attempt, error = %err, "cache invalidation failed");
                }
            }
        }
        tracing::error!(
            code,
            "cache invalidation exhausted retries; entry may serve stale status until TTL"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LinkStatus::{Active, Blocked, Deleted, Disabled};

    #[test]
    fn owner_toggles_between_active_and_disabled() {
        assert!(transition_allowed(Active, Disabled, false));
        assert!(transition_allowed(Disabled, Active, false));
    }

    #[test]
    fn blocking_and_unblocking_require_admin() {
        assert!(!transition_allowed(Active, Blocked, false));
        assert!(transition_allowed(Active, Blocked, true));
        assert!(!transition_allowed(Blocked, Active, false));
        assert!(transition_allowed(Blocked, Active, true));
    }

    #[test]
    fn deletion_is_allowed_from_any_non_deleted_state() {
        for from in [Active, Disabled, Blocked] {
            assert!(transition_allowed(from, Deleted, false));
        }
    }

    #[test]
    fn deleted_is_terminal() {
        for to in [Active, Disabled, Blocked] {
            assert!(!transition_allowed(Deleted, to, true));
        }
    }

    #[test]
    fn blocked_cannot_be_disabled() {
        assert!(!transition_allowed(Blocked, Disabled, true));
    }
}
