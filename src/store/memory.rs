use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::models::{
    AnalyticsEvent, BillingAccount, BlacklistEntry, Link, LinkStatus, Organization,
};
use crate::store::{LinkStore, QuotaReservation, StoreError, StoreResult};

/// In-memory backend for tests and local development. Every operation takes
/// the inner lock exactly once, so the code-namespace and counter updates
/// have the same atomicity the durable backend gets from conditional writes.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
    fail_next_link_insert: AtomicBool,
    fail_next_event_insert: AtomicBool,
    fail_next_click_increment: AtomicBool,
    stall_next_event_insert: AtomicBool,
}

#[derive(Default)]
struct Inner {
    links: HashMap<Uuid, Link>,
    /// Live short codes only; deleting or blocking a link removes its entry.
    codes: HashMap<String, Uuid>,
    counters: HashMap<(Uuid, String), i64>,
    events: Vec<AnalyticsEvent>,
    orgs: HashMap<Uuid, Organization>,
    accounts: HashMap<Uuid, BillingAccount>,
    blacklist: HashMap<Uuid, BlacklistEntry>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `insert_link` fail with `Unavailable`, to exercise the
    /// reservation-compensation path.
    pub fn fail_next_link_insert(&self) {
        self.fail_next_link_insert.store(true, Ordering::SeqCst);
    }

    /// Makes the next `insert_event` fail, to exercise the redirect's
    /// analytics partial-failure policy.
    pub fn fail_next_event_insert(&self) {
        self.fail_next_event_insert.store(true, Ordering::SeqCst);
    }

    /// Makes the next `increment_clicks` fail.
    pub fn fail_next_click_increment(&self) {
        self.fail_next_click_increment.store(true, Ordering::SeqCst);
    }

    /// Makes the next `insert_event` hang far past any caller timeout.
    pub fn stall_next_event_insert(&self) {
        self.stall_next_event_insert.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl LinkStore for MemoryStore {
    async fn insert_link(&self, link: &Link) -> StoreResult<()> {
        if self.fail_next_link_insert.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected failure".to_string()));
        }
        let mut inner = self.inner.write();
        if inner.codes.contains_key(&link.short_code) {
            return Err(StoreError::DuplicateCode);
        }
        inner.codes.insert(link.short_code.clone(), link.id);
        inner.links.insert(link.id, link.clone());
        Ok(())
    }

    async fn link_by_id(&self, id: Uuid) -> StoreResult<Option<Link>> {
        Ok(self.inner.read().links.get(&id).cloned())
    }

    async fn live_link_by_code(&self, code: &str) -> StoreResult<Option<Link>> {
        let inner = self.inner.read();
        let Some(id) = inner.codes.get(code) else {
            return Ok(None);
        };
        Ok(inner.links.get(id).cloned())
    }

    async fn links_for_org(
        &self,
        org_id: Uuid,
        include_moderated: bool,
    ) -> StoreResult<Vec<Link>> {
        let inner = self.inner.read();
        let mut links: Vec<Link> = inner
            .links
            .values()
            .filter(|link| link.org_id == org_id)
            .filter(|link| include_moderated || link.status.is_live())
            .cloned()
            .collect();
        links.sort_by_key(|link| link.created_at);
        Ok(links)
    }

    async fn transition_link(
        &self,
        id: Uuid,
        from: &[LinkStatus],
        to: LinkStatus,
    ) -> StoreResult<Option<Link>> {
        let mut inner = self.inner.write();
        let Some(current) = inner.links.get(&id) else {
            return Ok(None);
        };
        if !from.contains(&current.status) {
            return Ok(None);
        }
        let was_live = current.status.is_live();
        let code = current.short_code.clone();
        if to.is_live() && !was_live {
            // Re-entering the namespace; the code may have been reallocated.
            if inner.codes.contains_key(&code) {
                return Err(StoreError::DuplicateCode);
            }
            inner.codes.insert(code.clone(), id);
        } else if !to.is_live() && was_live {
            if inner.codes.get(&code) == Some(&id) {
                inner.codes.remove(&code);
            }
        }
        match inner.links.get_mut(&id) {
            Some(link) => {
                link.status = to;
                link.updated_at = Utc::now();
                Ok(Some(link.clone()))
            }
            None => Ok(None),
        }
    }

    async fn live_links_matching(&self, entry: &BlacklistEntry) -> StoreResult<Vec<Link>> {
        let inner = self.inner.read();
        Ok(inner
            .links
            .values()
            .filter(|link| link.status.is_live() && entry.matches_url(&link.destination))
            .cloned()
            .collect())
    }

    async fn increment_clicks(&self, id: Uuid) -> StoreResult<()> {
        if self.fail_next_click_increment.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected failure".to_string()));
        }
        let mut inner = self.inner.write();
        if let Some(link) = inner.links.get_mut(&id) {
            link.click_count += 1;
        }
        Ok(())
    }

    async fn insert_event(&self, event: &AnalyticsEvent) -> StoreResult<()> {
        if self.stall_next_event_insert.swap(false, Ordering::SeqCst) {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
        }
        if self.fail_next_event_insert.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected failure".to_string()));
        }
        self.inner.write().events.push(event.clone());
        Ok(())
    }

    async fn events_for_link(
        &self,
        link_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> StoreResult<Vec<AnalyticsEvent>> {
        let inner = self.inner.read();
        let mut events: Vec<AnalyticsEvent> = inner
            .events
            .iter()
            .filter(|event| event.link_id == link_id)
            .filter(|event| since.is_none_or(|cutoff| event.timestamp >= cutoff))
            .cloned()
            .collect();
        events.sort_by_key(|event| std::cmp::Reverse(event.timestamp));
        Ok(events)
    }

    async fn reserve_quota(
        &self,
        billing_account_id: Uuid,
        month: &str,
        limit: Option<i64>,
    ) -> StoreResult<QuotaReservation> {
        let mut inner = self.inner.write();
        let counter = inner
            .counters
            .entry((billing_account_id, month.to_string()))
            .or_insert(0);
        if let Some(limit) = limit {
            if *counter >= limit {
                return Ok(QuotaReservation::Denied {
                    current: *counter,
                    limit,
                });
            }
        }
        *counter += 1;
        Ok(QuotaReservation::Allowed { current: *counter })
    }

    async fn release_quota(&self, billing_account_id: Uuid, month: &str) -> StoreResult<()> {
        let mut inner = self.inner.write();
        if let Some(counter) = inner
            .counters
            .get_mut(&(billing_account_id, month.to_string()))
        {
            *counter = (*counter - 1).max(0);
        }
        Ok(())
    }

    async fn organization(&self, id: Uuid) -> StoreResult<Option<Organization>> {
        Ok(self.inner.read().orgs.get(&id).cloned())
    }

    async fn billing_account(&self, id: Uuid) -> StoreResult<Option<BillingAccount>> {
        Ok(self.inner.read().accounts.get(&id).cloned())
    }

    async fn insert_organization(&self, org: &Organization) -> StoreResult<()> {
        self.inner.write().orgs.insert(org.id, org.clone());
        Ok(())
    }

    async fn insert_billing_account(&self, account: &BillingAccount) -> StoreResult<()> {
        self.inner.write().accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn insert_blacklist_entry(&self, entry: &BlacklistEntry) -> StoreResult<()> {
        self.inner.write().blacklist.insert(entry.id, entry.clone());
        Ok(())
    }

    async fn blacklist_entries(&self) -> StoreResult<Vec<BlacklistEntry>> {
        Ok(self.inner.read().blacklist.values().cloned().collect())
    }

    async fn remove_blacklist_entry(&self, id: Uuid) -> StoreResult<bool> {
        Ok(self.inner.write().blacklist.remove(&id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn link_with_code(code: &str) -> Link {
        let mut link = Link::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Url::parse("https://example.com").unwrap(),
            None,
            None,
        );
        link.short_code = code.to_string();
        link
    }

    #[tokio::test]
    async fn duplicate_live_code_is_rejected() {
        let store = MemoryStore::new();
        store.insert_link(&link_with_code("abc1")).await.unwrap();
        let err = store.insert_link(&link_with_code("abc1")).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateCode));
    }

    #[tokio::test]
    async fn deleting_frees_the_code_for_reuse() {
        let store = MemoryStore::new();
        let first = link_with_code("abc1");
        store.insert_link(&first).await.unwrap();
        store
            .transition_link(
                first.id,
                &[LinkStatus::Active, LinkStatus::Disabled],
                LinkStatus::Deleted,
            )
            .await
            .unwrap()
            .unwrap();
        assert!(store.live_link_by_code("abc1").await.unwrap().is_none());
        store.insert_link(&link_with_code("abc1")).await.unwrap();
    }

    #[tokio::test]
    async fn unblock_collides_with_a_reallocated_code() {
        let store = MemoryStore::new();
        let first = link_with_code("abc1");
        store.insert_link(&first).await.unwrap();
        store
            .transition_link(first.id, &[LinkStatus::Active], LinkStatus::Blocked)
            .await
            .unwrap()
            .unwrap();
        store.insert_link(&link_with_code("abc1")).await.unwrap();
        let err = store
            .transition_link(first.id, &[LinkStatus::Blocked], LinkStatus::Active)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateCode));
    }

    #[tokio::test]
    async fn transition_guard_makes_reblock_a_noop() {
        let store = MemoryStore::new();
        let link = link_with_code("abc1");
        store.insert_link(&link).await.unwrap();
        let live = [LinkStatus::Active, LinkStatus::Disabled];
        assert!(store
            .transition_link(link.id, &live, LinkStatus::Blocked)
            .await
            .unwrap()
            .is_some());
        assert!(store
            .transition_link(link.id, &live, LinkStatus::Blocked)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn quota_counter_stops_at_the_limit() {
        let store = MemoryStore::new();
        let account = Uuid::new_v4();
        for n in 1..=3 {
            let got = store.reserve_quota(account, "2026-08", Some(3)).await.unwrap();
            assert_eq!(got, QuotaReservation::Allowed { current: n });
        }
        let got = store.reserve_quota(account, "2026-08", Some(3)).await.unwrap();
        assert_eq!(got, QuotaReservation::Denied { current: 3, limit: 3 });
    }

    #[tokio::test]
    async fn release_compensates_a_reservation() {
        let store = MemoryStore::new();
        let account = Uuid::new_v4();
        store.reserve_quota(account, "2026-08", Some(1)).await.unwrap();
        store.release_quota(account, "2026-08").await.unwrap();
        let got = store.reserve_quota(account, "2026-08", Some(1)).await.unwrap();
        assert_eq!(got, QuotaReservation::Allowed { current: 1 });
    }

    #[tokio::test]
    async fn month_rollover_starts_a_fresh_counter() {
        let store = MemoryStore::new();
        let account = Uuid::new_v4();
        store.reserve_quota(account, "2026-08", Some(1)).await.unwrap();
        let got = store.reserve_quota(account, "2026-09", Some(1)).await.unwrap();
        assert_eq!(got, QuotaReservation::Allowed { current: 1 });
    }
}
