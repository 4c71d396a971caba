use axum::{
    Extension, Json,
    body::Body,
    extract::{Path, Query},
    http::{HeaderMap, StatusCode, header::LOCATION},
    response::Response,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::AppState;
use crate::analytics;
use crate::auth::Principal;
use crate::cache::LinkCache;
use crate::error::ServiceError;
use crate::models::{AnalyticsEvent, BlacklistEntry, CachedLink, Link, LinkStatus, MatchType};
use crate::resolve::Resolution;
use crate::store::LinkStore;
use crate::validate;

#[derive(Deserialize)]
pub struct CreateLinkRequest {
    pub destination_url: String,
    pub short_code: Option<String>,
    pub title: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: LinkStatus,
}

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub include_all: bool,
}

#[derive(Deserialize)]
pub struct BlockDestinationRequest {
    pub destination: String,
    pub match_type: MatchType,
    pub reason: String,
}

#[derive(Serialize)]
pub struct BlockDestinationResponse {
    pub entry: BlacklistEntry,
    pub affected_links: u64,
}

#[derive(Serialize)]
pub struct LinkStatsResponse {
    pub link_id: Uuid,
    pub click_count: i64,
    pub events: Vec<AnalyticsEvent>,
}

/// The hot path. Analytics writes are awaited before the response is built:
/// the runtime may cancel anything still in flight once the response starts
/// transmitting, so nothing here is fire-and-forget.
#[tracing::instrument(skip_all, fields(code = %code))]
pub async fn redirect(
    Extension(state): Extension<AppState>,
    Path(code): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ServiceError> {
    match state.resolver.resolve(&code).await? {
        Resolution::Found(resolved) => {
            let event = analytics::event_from_request(&resolved, &headers);
            state.recorder.record(event).await;

            Ok(Response::builder()
                .status(StatusCode::MOVED_PERMANENTLY)
                .header(LOCATION, resolved.destination.to_string())
                .body(Body::empty())
                .unwrap())
        }
        Resolution::NotFound => Err(ServiceError::NotFound),
    }
}

/// Creation pipeline, in the order the consistency protocol demands:
/// validation (no side effects) → quota reservation → probe insert →
/// best-effort cache prefill. A failed insert releases the reservation.
#[tracing::instrument(skip_all)]
pub async fn create_link(
    Extension(state): Extension<AppState>,
    principal: Principal,
    Json(body): Json<CreateLinkRequest>,
) -> Result<(StatusCode, Json<Link>), ServiceError> {
    let blacklist = state.store.blacklist_entries().await?;
    let destination = validate::screen_destination(&body.destination_url, &blacklist)?;
    if let Some(code) = &body.short_code {
        validate::validate_custom_code(code)?;
    }
    if let Some(expires_at) = body.expires_at {
        if expires_at <= Utc::now() {
            return Err(ServiceError::Validation(
                "expires_at is in the past".to_string(),
            ));
        }
    }

    let reservation = state.ledger.reserve_for_org(principal.org_id).await?;

    let link = Link::new(
        principal.org_id,
        principal.user_id,
        destination,
        body.title,
        body.expires_at,
    );
    let inserted = match body.short_code {
        Some(code) => state.allocator.insert_with_code(link, code).await,
        None => state.allocator.insert_with_generated_code(link).await,
    };
    let link = match inserted {
        Ok(link) => link,
        Err(err) => {
            state.ledger.release(&reservation).await;
            return Err(err);
        }
    };

    // A fresh link is most likely used immediately; prefill is best-effort.
    if let Err(err) = state
        .cache
        .put(&link.short_code, &CachedLink::from(&link))
        .await
    {
        tracing::warn!(code = %link.short_code, error = %err, "cache prefill failed");
    }

    Ok((StatusCode::CREATED, Json(link)))
}

pub async fn list_links(
    Extension(state): Extension<AppState>,
    principal: Principal,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Link>>, ServiceError> {
    let include_moderated = query.include_all && principal.is_admin();
    let links = state
        .store
        .links_for_org(principal.org_id, include_moderated)
        .await?;
    Ok(Json(links))
}

pub async fn get_link(
    Extension(state): Extension<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> Result<Json<Link>, ServiceError> {
    let link = authorize_link(&state, &principal, id).await?;
    Ok(Json(link))
}

pub async fn update_link_status(
    Extension(state): Extension<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateStatusRequest>,
) -> Result<Json<Link>, ServiceError> {
    if !matches!(body.status, LinkStatus::Active | LinkStatus::Disabled) {
        return Err(ServiceError::Validation(
            "status must be 'active' or 'disabled'".to_string(),
        ));
    }
    let link = authorize_link(&state, &principal, id).await?;
    let updated = state
        .gate
        .set_status(&link, body.status, principal.is_admin())
        .await?;
    Ok(Json(updated))
}

pub async fn delete_link(
    Extension(state): Extension<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ServiceError> {
    let link = authorize_link(&state, &principal, id).await?;
    state
        .gate
        .set_status(&link, LinkStatus::Deleted, principal.is_admin())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn link_stats(
    Extension(state): Extension<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> Result<Json<LinkStatsResponse>, ServiceError> {
    let link = authorize_link(&state, &principal, id).await?;
    let org = state
        .store
        .organization(link.org_id)
        .await?
        .ok_or(ServiceError::NotFound)?;
    let account = state
        .store
        .billing_account(org.billing_account_id)
        .await?
        .ok_or_else(|| {
            ServiceError::Storage("organization references a missing billing account".to_string())
        })?;
    let since = account
        .tier
        .retention_days()
        .map(|days| Utc::now() - Duration::days(days));
    let events = state.store.events_for_link(link.id, since).await?;
    Ok(Json(LinkStatsResponse {
        link_id: link.id,
        click_count: link.click_count,
        events,
    }))
}

/// Adds a blacklist rule and fans out: every currently-live link matching the
/// rule is blocked and its cache entry invalidated before we answer.
#[tracing::instrument(skip_all)]
pub async fn block_destination(
    Extension(state): Extension<AppState>,
    principal: Principal,
    Json(body): Json<BlockDestinationRequest>,
) -> Result<(StatusCode, Json<BlockDestinationResponse>), ServiceError> {
    require_admin(&principal)?;
    let destination = validate_rule(&body.destination, body.match_type)?;

    let entry = BlacklistEntry::new(destination, body.match_type, body.reason, principal.user_id);
    state.store.insert_blacklist_entry(&entry).await?;
    let affected_links = state.gate.block_destination(&entry).await?;

    Ok((
        StatusCode::CREATED,
        Json(BlockDestinationResponse {
            entry,
            affected_links,
        }),
    ))
}

pub async fn list_blacklist(
    Extension(state): Extension<AppState>,
    principal: Principal,
) -> Result<Json<Vec<BlacklistEntry>>, ServiceError> {
    require_admin(&principal)?;
    let entries = state.store.blacklist_entries().await?;
    Ok(Json(entries))
}

pub async fn remove_blacklist_entry(
    Extension(state): Extension<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ServiceError> {
    require_admin(&principal)?;
    if state.store.remove_blacklist_entry(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ServiceError::NotFound)
    }
}

fn require_admin(principal: &Principal) -> Result<(), ServiceError> {
    if principal.is_admin() {
        Ok(())
    } else {
        Err(ServiceError::Forbidden("admin role required".to_string()))
    }
}

/// Normalizes a rule before it is stored. Exact rules go through `Url::parse`
/// so they compare equal to the parsed form link destinations are stored in
/// (the raw literal may differ, e.g. a missing trailing slash).
fn validate_rule(destination: &str, match_type: MatchType) -> Result<String, ServiceError> {
    match match_type {
        MatchType::Exact => {
            let url = Url::parse(destination).map_err(|_| {
                ServiceError::Validation("exact rule must be a full URL".to_string())
            })?;
            Ok(url.to_string())
        }
        MatchType::Domain => {
            if destination.is_empty() || destination.contains('/') || destination.contains(':') {
                return Err(ServiceError::Validation(
                    "domain rule must be a bare host name".to_string(),
                ));
            }
            Ok(destination.to_ascii_lowercase())
        }
    }
}

/// Loads a link and checks the caller may act on it. Admins see everything;
/// members see their own org's non-deleted links (a cross-org id probe gets
/// the same 404 as a missing link).
async fn authorize_link(
    state: &AppState,
    principal: &Principal,
    id: Uuid,
) -> Result<Link, ServiceError> {
    let link = state
        .store
        .link_by_id(id)
        .await?
        .ok_or(ServiceError::NotFound)?;
    if principal.is_admin() {
        return Ok(link);
    }
    if link.org_id != principal.org_id {
        return Err(ServiceError::NotFound);
    }
    let org = state
        .store
        .organization(principal.org_id)
        .await?
        .ok_or(ServiceError::NotFound)?;
    if !org.has_member(principal.user_id) {
        return Err(ServiceError::Forbidden(
            "not a member of this organization".to_string(),
        ));
    }
    if link.status == LinkStatus::Deleted {
        return Err(ServiceError::NotFound);
    }
    Ok(link)
}
