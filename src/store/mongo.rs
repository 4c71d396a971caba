use async_trait::async_trait;
use bson::doc;
use chrono::{DateTime, Utc};
use futures_util::TryStreamExt;
use mongodb::{
    Client, Collection, IndexModel,
    error::{ErrorKind, WriteFailure},
    options::{ClientOptions, IndexOptions, ReturnDocument, ServerApi, ServerApiVersion},
};
use uuid::Uuid;

use crate::models::{
    AnalyticsEvent, BillingAccount, BlacklistEntry, Link, LinkStatus, MatchType, MonthlyCounter,
    Organization,
};
use crate::store::{LinkStore, QuotaReservation, StoreError, StoreResult};

const DB_NAME: &str = "linkspan";

/// MongoDB system of record. Short-code uniqueness rides on a partial unique
/// index scoped to live statuses, and the monthly counter uses a filtered
/// `$inc` upsert, so both contended writes are single server-side operations.
#[derive(Clone)]
pub struct MongoStore {
    client: Client,
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    match &*err.kind {
        ErrorKind::Write(WriteFailure::WriteError(write_error)) => write_error.code == 11000,
        ErrorKind::Command(command_error) => command_error.code == 11000,
        _ => false,
    }
}

fn map_err(err: mongodb::error::Error) -> StoreError {
    if is_duplicate_key(&err) {
        StoreError::DuplicateCode
    } else {
        StoreError::Unavailable(err.to_string())
    }
}

fn live_statuses() -> bson::Bson {
    bson::bson!([LinkStatus::Active.as_str(), LinkStatus::Disabled.as_str()])
}

/// Escapes a domain for use inside an anchored regex.
fn regex_escape(domain: &str) -> String {
    let mut escaped = String::with_capacity(domain.len());
    for ch in domain.chars() {
        if !ch.is_ascii_alphanumeric() && ch != '-' {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

impl MongoStore {
    pub async fn connect(connection_string: &str) -> StoreResult<Self> {
        let mut client_options = ClientOptions::parse(connection_string)
            .await
            .map_err(map_err)?;
        let server_api = ServerApi::builder().version(ServerApiVersion::V1).build();
        client_options.server_api = Some(server_api);

        let client = Client::with_options(client_options).map_err(map_err)?;
        Ok(Self { client })
    }

    fn links(&self) -> Collection<Link> {
        self.client.database(DB_NAME).collection("links")
    }

    fn counters(&self) -> Collection<MonthlyCounter> {
        self.client.database(DB_NAME).collection("monthly_counters")
    }

    fn events(&self) -> Collection<AnalyticsEvent> {
        self.client.database(DB_NAME).collection("analytics_events")
    }

    fn orgs(&self) -> Collection<Organization> {
        self.client.database(DB_NAME).collection("organizations")
    }

    fn accounts(&self) -> Collection<BillingAccount> {
        self.client.database(DB_NAME).collection("billing_accounts")
    }

    fn blacklist(&self) -> Collection<BlacklistEntry> {
        self.client.database(DB_NAME).collection("destination_blacklist")
    }

    /// Creates the indexes the consistency protocol depends on. Idempotent.
    pub async fn ensure_indexes(&self) -> StoreResult<()> {
        let code_index = IndexModel::builder()
            .keys(doc! { "short_code": 1 })
            .options(
                IndexOptions::builder()
                    .unique(true)
                    .partial_filter_expression(doc! { "status": { "$in": live_statuses() } })
                    .build(),
            )
            .build();
        self.links().create_index(code_index).await.map_err(map_err)?;

        let counter_index = IndexModel::builder()
            .keys(doc! { "billing_account_id": 1, "month": 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();
        self.counters()
            .create_index(counter_index)
            .await
            .map_err(map_err)?;

        let event_index = IndexModel::builder()
            .keys(doc! { "link_id": 1, "timestamp": -1 })
            .build();
        self.events().create_index(event_index).await.map_err(map_err)?;

        Ok(())
    }
}

#[async_trait]
impl LinkStore for MongoStore {
    async fn insert_link(&self, link: &Link) -> StoreResult<()> {
        self.links().insert_one(link).await.map_err(map_err)?;
        Ok(())
    }

    async fn link_by_id(&self, id: Uuid) -> StoreResult<Option<Link>> {
        self.links()
            .find_one(doc! { "id": id.to_string() })
            .await
            .map_err(map_err)
    }

    async fn live_link_by_code(&self, code: &str) -> StoreResult<Option<Link>> {
        self.links()
            .find_one(doc! { "short_code": code, "status": { "$in": live_statuses() } })
            .await
            .map_err(map_err)
    }

    async fn links_for_org(
        &self,
        org_id: Uuid,
        include_moderated: bool,
    ) -> StoreResult<Vec<Link>> {
        let mut filter = doc! { "org_id": org_id.to_string() };
        if !include_moderated {
            filter.insert("status", doc! { "$in": live_statuses() });
        }
        let cursor = self.links().find(filter).await.map_err(map_err)?;
        let mut links: Vec<Link> = cursor.try_collect().await.map_err(map_err)?;
        links.sort_by_key(|link| link.created_at);
        Ok(links)
    }

    async fn transition_link(
        &self,
        id: Uuid,
        from: &[LinkStatus],
        to: LinkStatus,
    ) -> StoreResult<Option<Link>> {
        let from: Vec<&str> = from.iter().map(|status| status.as_str()).collect();
        let filter = doc! { "id": id.to_string(), "status": { "$in": from } };
        // Serialize through serde so the value matches what insert_one wrote.
        let updated_at =
            bson::to_bson(&Utc::now()).map_err(|err| StoreError::Unavailable(err.to_string()))?;
        let update = doc! { "$set": { "status": to.as_str(), "updated_at": updated_at } };
        self.links()
            .find_one_and_update(filter, update)
            .return_document(ReturnDocument::After)
            .await
            .map_err(map_err)
    }

    async fn live_links_matching(&self, entry: &BlacklistEntry) -> StoreResult<Vec<Link>> {
        let filter = match entry.match_type {
            MatchType::Exact => doc! {
                "destination": &entry.destination,
                "status": { "$in": live_statuses() },
            },
            MatchType::Domain => {
                let domain = entry.destination.to_ascii_lowercase();
                let subdomain_pattern = format!("\\.{}$", regex_escape(&domain));
                doc! {
                    "status": { "$in": live_statuses() },
                    "$or": [
                        { "host": &domain },
                        { "host": { "$regex": subdomain_pattern } },
                    ],
                }
            }
        };
        let cursor = self.links().find(filter).await.map_err(map_err)?;
        cursor.try_collect().await.map_err(map_err)
    }

    async fn increment_clicks(&self, id: Uuid) -> StoreResult<()> {
        self.links()
            .update_one(
                doc! { "id": id.to_string() },
                doc! { "$inc": { "click_count": 1 } },
            )
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn insert_event(&self, event: &AnalyticsEvent) -> StoreResult<()> {
        self.events().insert_one(event).await.map_err(map_err)?;
        Ok(())
    }

    async fn events_for_link(
        &self,
        link_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> StoreResult<Vec<AnalyticsEvent>> {
        let cursor = self
            .events()
            .find(doc! { "link_id": link_id.to_string() })
            .await
            .map_err(map_err)?;
        let mut events: Vec<AnalyticsEvent> = cursor.try_collect().await.map_err(map_err)?;
        if let Some(cutoff) = since {
            events.retain(|event| event.timestamp >= cutoff);
        }
        events.sort_by_key(|event| std::cmp::Reverse(event.timestamp));
        Ok(events)
    }

    async fn reserve_quota(
        &self,
        billing_account_id: Uuid,
        month: &str,
        limit: Option<i64>,
    ) -> StoreResult<QuotaReservation> {
        // Increment-if-below-limit: with the guard in place, a counter at the
        // limit fails the filter and the upsert collides with the
        // (account, month) unique index instead of incrementing. A duplicate
        // key can also mean two requests raced to create the month's counter,
        // in which case a retry finds the freshly inserted row.
        for _ in 0..3 {
            let mut filter = doc! {
                "billing_account_id": billing_account_id.to_string(),
                "month": month,
            };
            if let Some(limit) = limit {
                filter.insert("links_created", doc! { "$lt": limit });
            }
            let update = doc! { "$inc": { "links_created": 1 } };

            let result = self
                .counters()
                .find_one_and_update(filter, update)
                .upsert(true)
                .return_document(ReturnDocument::After)
                .await;

            match result {
                Ok(Some(counter)) => {
                    return Ok(QuotaReservation::Allowed {
                        current: counter.links_created,
                    });
                }
                Ok(None) => return Ok(QuotaReservation::Allowed { current: 1 }),
                Err(err) if is_duplicate_key(&err) => {
                    let current = self
                        .counters()
                        .find_one(doc! {
                            "billing_account_id": billing_account_id.to_string(),
                            "month": month,
                        })
                        .await
                        .map_err(map_err)?
                        .map_or(0, |counter| counter.links_created);
                    if let Some(limit) = limit {
                        if current >= limit {
                            return Ok(QuotaReservation::Denied { current, limit });
                        }
                    }
                }
                Err(err) => return Err(map_err(err)),
            }
        }
        Err(StoreError::Unavailable(
            "monthly counter contention persisted across retries".to_string(),
        ))
    }

    async fn release_quota(&self, billing_account_id: Uuid, month: &str) -> StoreResult<()> {
        self.counters()
            .update_one(
                doc! {
                    "billing_account_id": billing_account_id.to_string(),
                    "month": month,
                    "links_created": { "$gt": 0 },
                },
                doc! { "$inc": { "links_created": -1 } },
            )
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn organization(&self, id: Uuid) -> StoreResult<Option<Organization>> {
        self.orgs()
            .find_one(doc! { "id": id.to_string() })
            .await
            .map_err(map_err)
    }

    async fn billing_account(&self, id: Uuid) -> StoreResult<Option<BillingAccount>> {
        self.accounts()
            .find_one(doc! { "id": id.to_string() })
            .await
            .map_err(map_err)
    }

    async fn insert_organization(&self, org: &Organization) -> StoreResult<()> {
        self.orgs().insert_one(org).await.map_err(map_err)?;
        Ok(())
    }

    async fn insert_billing_account(&self, account: &BillingAccount) -> StoreResult<()> {
        self.accounts().insert_one(account).await.map_err(map_err)?;
        Ok(())
    }

    async fn insert_blacklist_entry(&self, entry: &BlacklistEntry) -> StoreResult<()> {
        self.blacklist().insert_one(entry).await.map_err(map_err)?;
        Ok(())
    }

    async fn blacklist_entries(&self) -> StoreResult<Vec<BlacklistEntry>> {
        let cursor = self.blacklist().find(doc! {}).await.map_err(map_err)?;
        cursor.try_collect().await.map_err(map_err)
    }

    async fn remove_blacklist_entry(&self, id: Uuid) -> StoreResult<bool> {
        let result = self
            .blacklist()
            .delete_one(doc! { "id": id.to_string() })
            .await
            .map_err(map_err)?;
        Ok(result.deleted_count > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regex_escape_neutralizes_dots() {
        assert_eq!(regex_escape("bad.test"), "bad\\.test");
        assert_eq!(regex_escape("a-b.c"), "a-b\\.c");
    }

    #[test]
    fn transition_timestamp_matches_the_insert_serialization() {
        let now = Utc::now();
        let via_update = bson::to_bson(&now).unwrap();
        let via_insert = serde_json::to_value(now).unwrap();
        assert_eq!(via_update.as_str(), via_insert.as_str());
    }
}
