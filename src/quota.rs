use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::ServiceError;
use crate::store::{LinkStore, QuotaReservation};

/// Month key for the counter row, derived from wall-clock UTC. Rollover is
/// implicit: a new month simply has no row yet.
#[must_use]
pub fn month_key(now: DateTime<Utc>) -> String {
    now.format("%Y-%m").to_string()
}

/// A reservation that succeeded; carries what `release` needs if the link
/// write never lands.
#[derive(Debug, Clone)]
pub struct Reservation {
    pub billing_account_id: Uuid,
    pub month: String,
}

/// Enforces per-billing-account monthly creation caps. Quota authority is
/// always resolved through the ownership chain (org → billing account) at
/// enforcement time; the tier is never read off the organization.
#[derive(Clone)]
pub struct QuotaLedger {
    store: Arc<dyn LinkStore>,
}

impl QuotaLedger {
    #[must_use]
    pub fn new(store: Arc<dyn LinkStore>) -> Self {
        Self { store }
    }

    /// Atomically reserves one link creation for the org's billing account.
    /// The unlimited tier skips the cap but still increments the counter.
    pub async fn reserve_for_org(&self, org_id: Uuid) -> Result<Reservation, ServiceError> {
        let org = self
            .store
            .organization(org_id)
            .await?
            .ok_or_else(|| ServiceError::Forbidden("unknown organization".to_string()))?;
        let account = self
            .store
            .billing_account(org.billing_account_id)
            .await?
            .ok_or_else(|| {
                ServiceError::Storage(format!(
                    "organization {org_id} references a missing billing account"
                ))
            })?;

        let month = month_key(Utc::now());
        match self
            .store
            .reserve_quota(account.id, &month, account.tier.monthly_link_cap())
            .await?
        {
            QuotaReservation::Allowed { current } => {
                tracing::debug!(
                    billing_account_id = %account.id,
                    %month,
                    current,
                    "quota reserved"
                );
                Ok(Reservation {
                    billing_account_id: account.id,
                    month,
                })
            }
            QuotaReservation::Denied { current, limit } => {
                Err(ServiceError::QuotaExceeded { current, limit })
            }
        }
    }

    /// Compensates a reservation whose link write failed. Best-effort: a
    /// failed release is logged, not surfaced — the caller is already on an
    /// error path.
    pub async fn release(&self, reservation: &Reservation) {
        if let Err(err) = self
            .store
            .release_quota(reservation.billing_account_id, &reservation.month)
            .await
        {
            tracing::error!(
                billing_account_id = %reservation.billing_account_id,
                month = %reservation.month,
                error = %err,
                "failed to release quota reservation"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BillingAccount, Organization, Tier};
    use crate::store::MemoryStore;
    use futures_util::future::join_all;

    async fn seed(store: &MemoryStore, tier: Tier) -> Uuid {
        let owner = Uuid::new_v4();
        let account = BillingAccount {
            id: Uuid::new_v4(),
            owner_id: owner,
            tier,
        };
        store.insert_billing_account(&account).await.unwrap();
        let org = Organization {
            id: Uuid::new_v4(),
            name: "acme".to_string(),
            slug: "acme".to_string(),
            owner_id: owner,
            member_ids: vec![],
            billing_account_id: account.id,
        };
        store.insert_organization(&org).await.unwrap();
        org.id
    }

    #[test]
    fn month_key_is_year_dash_month() {
        let now = "2026-08-27T12:00:00Z".parse::<DateTime<Utc>>().unwrap();
        assert_eq!(month_key(now), "2026-08");
    }

    #[tokio::test]
    async fn concurrent_reservations_never_exceed_the_limit() {
        let store = Arc::new(MemoryStore::new());
        let org_id = seed(&store, Tier::Free).await;
        let ledger = QuotaLedger::new(store);
        let limit = Tier::Free.monthly_link_cap().unwrap();

        let attempts = (0..limit + 10).map(|_| {
            let ledger = ledger.clone();
            async move { ledger.reserve_for_org(org_id).await }
        });
        let results = join_all(attempts).await;

        let allowed = results.iter().filter(|result| result.is_ok()).count();
        assert_eq!(allowed as i64, limit);
        assert!(results.iter().any(|result| matches!(
            result,
            Err(ServiceError::QuotaExceeded { current, limit: l }) if *current == limit && *l == limit
        )));
    }

    #[tokio::test]
    async fn unlimited_tier_always_allows_but_still_counts() {
        let store = Arc::new(MemoryStore::new());
        let org_id = seed(&store, Tier::Unlimited).await;
        let ledger = QuotaLedger::new(store.clone());
        for _ in 0..50 {
            ledger.reserve_for_org(org_id).await.unwrap();
        }
    }

    #[tokio::test]
    async fn release_returns_the_slot() {
        let store = Arc::new(MemoryStore::new());
        let owner = Uuid::new_v4();
        let account = BillingAccount {
            id: Uuid::new_v4(),
            owner_id: owner,
            tier: Tier::Free,
        };
        store.insert_billing_account(&account).await.unwrap();
        let org = Organization {
            id: Uuid::new_v4(),
            name: "acme".to_string(),
            slug: "acme".to_string(),
            owner_id: owner,
            member_ids: vec![],
            billing_account_id: account.id,
        };
        store.insert_organization(&org).await.unwrap();

        let ledger = QuotaLedger::new(store);
        let limit = Tier::Free.monthly_link_cap().unwrap();
        let mut last = None;
        for _ in 0..limit {
            last = Some(ledger.reserve_for_org(org.id).await.unwrap());
        }
        assert!(matches!(
            ledger.reserve_for_org(org.id).await,
            Err(ServiceError::QuotaExceeded { .. })
        ));
        ledger.release(&last.unwrap()).await;
        ledger.reserve_for_org(org.id).await.unwrap();
    }
}
