use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderMap;
use axum::http::header::{REFERER, USER_AGENT};
use chrono::Utc;
use tokio::time::timeout;
use uuid::Uuid;

use crate::models::AnalyticsEvent;
use crate::resolve::Resolved;
use crate::store::LinkStore;

/// Geo hint injected by the edge, when present.
const GEO_HEADER: &str = "x-geo-country";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Completed,
    Failed,
}

/// Persists the per-click event and bumps the link's click counter.
///
/// The execution environment may be torn down the instant a response starts
/// transmitting, so both writes run on the synchronous critical path of the
/// redirect: independent, joined, and fully awaited before the response is
/// released. The attempt is bounded by a timeout so a hung write cannot hold
/// the redirect hostage. Either failure is logged for operators and never
/// propagated — following a link must not depend on analytics availability.
#[derive(Clone)]
pub struct AnalyticsRecorder {
    store: Arc<dyn LinkStore>,
    write_timeout: Duration,
}

impl AnalyticsRecorder {
    #[must_use]
    pub fn new(store: Arc<dyn LinkStore>, write_timeout: Duration) -> Self {
        Self {
            store,
            write_timeout,
        }
    }

    pub async fn record(&self, event: AnalyticsEvent) -> RecordOutcome {
        let link_id = event.link_id;
        let writes = async {
            tokio::join!(
                self.store.insert_event(&event),
                self.store.increment_clicks(link_id),
            )
        };
        let Ok((event_result, click_result)) = timeout(self.write_timeout, writes).await else {
            tracing::error!(link_id = %link_id, "analytics writes timed out");
            return RecordOutcome::Failed;
        };

        let mut outcome = RecordOutcome::Completed;
        if let Err(err) = event_result {
            outcome = RecordOutcome::Failed;
            tracing::error!(link_id = %link_id, error = %err, "analytics event write failed");
        }
        if let Err(err) = click_result {
            outcome = RecordOutcome::Failed;
            tracing::error!(link_id = %link_id, error = %err, "click count increment failed");
        }
        outcome
    }
}

/// Builds the click event from the redirect request's headers.
#[must_use]
pub fn event_from_request(resolved: &Resolved, headers: &HeaderMap) -> AnalyticsEvent {
    let header = |name| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    };
    AnalyticsEvent {
        id: Uuid::new_v4(),
        link_id: resolved.link_id,
        org_id: resolved.org_id,
        timestamp: Utc::now(),
        referrer: header(REFERER.as_str()),
        user_agent: header(USER_AGENT.as_str()),
        country: header(GEO_HEADER),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use url::Url;

    fn resolved() -> Resolved {
        Resolved {
            link_id: Uuid::new_v4(),
            org_id: Uuid::new_v4(),
            destination: Url::parse("https://example.com").unwrap(),
        }
    }

    #[tokio::test]
    async fn record_completes_both_writes_before_returning() {
        let store = Arc::new(MemoryStore::new());
        let recorder = AnalyticsRecorder::new(store.clone(), Duration::from_secs(1));

        let mut link = crate::models::Link::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Url::parse("https://example.com").unwrap(),
            None,
            None,
        );
        link.short_code = "demo01".to_string();
        store.insert_link(&link).await.unwrap();

        let mut target = resolved();
        target.link_id = link.id;
        target.org_id = link.org_id;

        for _ in 0..3 {
            let outcome = recorder
                .record(event_from_request(&target, &HeaderMap::new()))
                .await;
            assert_eq!(outcome, RecordOutcome::Completed);
        }

        // No polling: completion is guaranteed by the time record() returns.
        let stored = store.link_by_id(link.id).await.unwrap().unwrap();
        assert_eq!(stored.click_count, 3);
        assert_eq!(store.events_for_link(link.id, None).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn stalled_writes_are_cut_off_by_the_timeout() {
        let store = Arc::new(MemoryStore::new());
        let recorder = AnalyticsRecorder::new(store.clone(), Duration::from_millis(50));

        store.stall_next_event_insert();
        let outcome = recorder
            .record(event_from_request(&resolved(), &HeaderMap::new()))
            .await;
        assert_eq!(outcome, RecordOutcome::Failed);
    }

    #[tokio::test]
    async fn event_captures_request_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(REFERER, "https://ref.example".parse().unwrap());
        headers.insert(USER_AGENT, "test-agent".parse().unwrap());
        headers.insert(GEO_HEADER, "DE".parse().unwrap());

        let event = event_from_request(&resolved(), &headers);
        assert_eq!(event.referrer.as_deref(), Some("https://ref.example"));
        assert_eq!(event.user_agent.as_deref(), Some("test-agent"));
        assert_eq!(event.country.as_deref(), Some("DE"));
    }
}
