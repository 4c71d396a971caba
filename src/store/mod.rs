pub mod memory;
pub mod mongo;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{
    AnalyticsEvent, BillingAccount, BlacklistEntry, Link, LinkStatus, Organization,
};

pub use memory::MemoryStore;
pub use mongo::MongoStore;

#[derive(Debug)]
pub enum StoreError {
    /// A unique-insert (or unblock) collided with a live short code.
    DuplicateCode,
    Unavailable(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateCode => write!(f, "short code already taken"),
            Self::Unavailable(message) => write!(f, "store unavailable: {message}"),
        }
    }
}

impl std::error::Error for StoreError {}

pub type StoreResult<T> = Result<T, StoreError>;

/// Outcome of an atomic quota reservation. `current` is the counter value
/// after (Allowed) or at the time of (Denied) the attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaReservation {
    Allowed { current: i64 },
    Denied { current: i64, limit: i64 },
}

/// Durable system of record. Both contended resources — the short-code
/// namespace and the monthly counter — are guarded by the backend's own
/// atomic conditional-write primitive; callers never lock around this trait.
#[async_trait]
pub trait LinkStore: Send + Sync {
    /// Unique insert among live-status links; a collision is
    /// `StoreError::DuplicateCode`, not a silent overwrite.
    async fn insert_link(&self, link: &Link) -> StoreResult<()>;

    async fn link_by_id(&self, id: Uuid) -> StoreResult<Option<Link>>;

    /// Lookup by code restricted to live statuses. Blocked and deleted links
    /// have left the namespace and are invisible here.
    async fn live_link_by_code(&self, code: &str) -> StoreResult<Option<Link>>;

    async fn links_for_org(
        &self,
        org_id: Uuid,
        include_moderated: bool,
    ) -> StoreResult<Vec<Link>>;

    /// Guarded status transition: applies `to` only while the current status
    /// is in `from`. Returns the updated link, or `None` when the guard did
    /// not match (making re-application a no-op). Moving into a live status
    /// re-enters the code namespace and can fail with `DuplicateCode`.
    async fn transition_link(
        &self,
        id: Uuid,
        from: &[LinkStatus],
        to: LinkStatus,
    ) -> StoreResult<Option<Link>>;

    /// Live links matched by a blacklist rule, for moderation fan-out.
    async fn live_links_matching(&self, entry: &BlacklistEntry) -> StoreResult<Vec<Link>>;

    async fn increment_clicks(&self, id: Uuid) -> StoreResult<()>;

    async fn insert_event(&self, event: &AnalyticsEvent) -> StoreResult<()>;

    async fn events_for_link(
        &self,
        link_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> StoreResult<Vec<AnalyticsEvent>>;

    /// Atomic increment-if-below-limit on the (account, month) counter row,
    /// creating the row lazily. `limit: None` (unlimited tier) still
    /// increments for observability.
    async fn reserve_quota(
        &self,
        billing_account_id: Uuid,
        month: &str,
        limit: Option<i64>,
    ) -> StoreResult<QuotaReservation>;

    /// Compensation for a reservation whose link write never landed.
    async fn release_quota(&self, billing_account_id: Uuid, month: &str) -> StoreResult<()>;

    async fn organization(&self, id: Uuid) -> StoreResult<Option<Organization>>;

    async fn billing_account(&self, id: Uuid) -> StoreResult<Option<BillingAccount>>;

    async fn insert_organization(&self, org: &Organization) -> StoreResult<()>;

    async fn insert_billing_account(&self, account: &BillingAccount) -> StoreResult<()>;

    async fn insert_blacklist_entry(&self, entry: &BlacklistEntry) -> StoreResult<()>;

    async fn blacklist_entries(&self) -> StoreResult<Vec<BlacklistEntry>>;

    async fn remove_blacklist_entry(&self, id: Uuid) -> StoreResult<bool>;
}
