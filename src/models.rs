use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkStatus {
    Active,
    Disabled,
    Blocked,
    Deleted,
}

impl LinkStatus {
    /// Live links are the ones occupying the short-code namespace.
    #[must_use]
    pub fn is_live(self) -> bool {
        matches!(self, Self::Active | Self::Disabled)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Disabled => "disabled",
            Self::Blocked => "blocked",
            Self::Deleted => "deleted",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Link {
    pub id: Uuid,
    pub org_id: Uuid,
    pub short_code: String,
    pub destination: Url,
    /// Lowercased destination host, denormalized for domain-rule matching.
    pub host: String,
    pub title: Option<String>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub status: LinkStatus,
    pub click_count: i64,
}

impl Link {
    /// A new active link without a short code yet; the allocator fills it in.
    #[must_use]
    pub fn new(
        org_id: Uuid,
        created_by: Uuid,
        destination: Url,
        title: Option<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        let now = Utc::now();
        let host = destination
            .host_str()
            .unwrap_or_default()
            .to_ascii_lowercase();
        Self {
            id: Uuid::new_v4(),
            org_id,
            short_code: String::new(),
            destination,
            host,
            title,
            created_by,
            created_at: now,
            updated_at: now,
            expires_at,
            status: LinkStatus::Active,
            click_count: 0,
        }
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Pro,
    Business,
    Unlimited,
}

impl Tier {
    /// Monthly link-creation cap; `None` means uncapped.
    #[must_use]
    pub fn monthly_link_cap(self) -> Option<i64> {
        match self {
            Self::Free => Some(30),
            Self::Pro => Some(1_000),
            Self::Business => Some(10_000),
            Self::Unlimited => None,
        }
    }

    /// Analytics retention window in days; `None` means unbounded.
    #[must_use]
    pub fn retention_days(self) -> Option<i64> {
        match self {
            Self::Free => Some(30),
            Self::Pro => Some(365),
            Self::Business => Some(730),
            Self::Unlimited => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub owner_id: Uuid,
    pub member_ids: Vec<Uuid>,
    /// Quota authority lives on the billing account, never here.
    pub billing_account_id: Uuid,
}

impl Organization {
    #[must_use]
    pub fn has_member(&self, user_id: Uuid) -> bool {
        self.owner_id == user_id || self.member_ids.contains(&user_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingAccount {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub tier: Tier,
}

/// One row per (billing account, calendar month), created lazily on the
/// first reservation of the month.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonthlyCounter {
    pub billing_account_id: Uuid,
    pub month: String,
    pub links_created: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsEvent {
    pub id: Uuid,
    pub link_id: Uuid,
    pub org_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub referrer: Option<String>,
    pub user_agent: Option<String>,
    pub country: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Exact,
    Domain,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlacklistEntry {
    pub id: Uuid,
    pub destination: String,
    pub match_type: MatchType,
    pub reason: String,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

impl BlacklistEntry {
    #[must_use]
    pub fn new(
        destination: String,
        match_type: MatchType,
        reason: String,
        created_by: Uuid,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            destination,
            match_type,
            reason,
            created_by,
            created_at: Utc::now(),
        }
    }

    /// Domain rules match the host itself and any subdomain of it; exact
    /// rules match the literal URL string only.
    #[must_use]
    pub fn matches_url(&self, url: &Url) -> bool {
        match self.match_type {
            MatchType::Exact => url.as_str() == self.destination,
            MatchType::Domain => url.host_str().is_some_and(|host| self.matches_host(host)),
        }
    }

    #[must_use]
    pub fn matches_host(&self, host: &str) -> bool {
        if self.match_type != MatchType::Domain {
            return false;
        }
        let host = host.to_ascii_lowercase();
        let domain = self.destination.to_ascii_lowercase();
        host == domain || host.ends_with(&format!(".{domain}"))
    }
}

/// What the fast lookup cache stores per short code. Status and expiry ride
/// along with the destination so a hit can be refused without touching the
/// durable store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedLink {
    pub link_id: Uuid,
    pub org_id: Uuid,
    pub destination: Url,
    pub status: LinkStatus,
    pub expires_at: Option<DateTime<Utc>>,
}

impl CachedLink {
    #[must_use]
    pub fn servable(&self, now: DateTime<Utc>) -> bool {
        self.status == LinkStatus::Active
            && !self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

impl From<&Link> for CachedLink {
    fn from(link: &Link) -> Self {
        Self {
            link_id: link.id,
            org_id: link.org_id,
            destination: link.destination.clone(),
            status: link.status,
            expires_at: link.expires_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn domain_entry(domain: &str) -> BlacklistEntry {
        BlacklistEntry::new(
            domain.to_string(),
            MatchType::Domain,
            "test".to_string(),
            Uuid::new_v4(),
        )
    }

    #[test]
    fn domain_rule_matches_host_and_subdomains() {
        let entry = domain_entry("bad.test");
        assert!(entry.matches_url(&Url::parse("https://bad.test/anything").unwrap()));
        assert!(entry.matches_url(&Url::parse("https://deep.sub.bad.test/x").unwrap()));
        assert!(!entry.matches_url(&Url::parse("https://good.test/bad.test").unwrap()));
        assert!(!entry.matches_url(&Url::parse("https://notbad.test/").unwrap()));
    }

    #[test]
    fn exact_rule_matches_literal_url_only() {
        let entry = BlacklistEntry::new(
            "https://bad.test/page".to_string(),
            MatchType::Exact,
            "test".to_string(),
            Uuid::new_v4(),
        );
        assert!(entry.matches_url(&Url::parse("https://bad.test/page").unwrap()));
        assert!(!entry.matches_url(&Url::parse("https://bad.test/other").unwrap()));
        assert!(!entry.matches_url(&Url::parse("https://bad.test/").unwrap()));
    }

    #[test]
    fn expiry_is_inclusive_of_now() {
        let mut link = Link::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Url::parse("https://example.com").unwrap(),
            None,
            None,
        );
        let now = Utc::now();
        assert!(!link.is_expired(now));
        link.expires_at = Some(now - chrono::Duration::seconds(1));
        assert!(link.is_expired(now));
    }

    #[test]
    fn cached_link_servable_requires_active_and_unexpired() {
        let link = Link::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Url::parse("https://example.com").unwrap(),
            None,
            None,
        );
        let mut cached = CachedLink::from(&link);
        let now = Utc::now();
        assert!(cached.servable(now));
        cached.status = LinkStatus::Disabled;
        assert!(!cached.servable(now));
        cached.status = LinkStatus::Active;
        cached.expires_at = Some(now - chrono::Duration::minutes(5));
        assert!(!cached.servable(now));
    }
}
