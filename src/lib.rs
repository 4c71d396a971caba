pub mod allocate;
pub mod analytics;
pub mod auth;
pub mod cache;
pub mod error;
pub mod moderation;
pub mod models;
pub mod quota;
pub mod resolve;
pub mod routes;
pub mod store;
pub mod validate;

use std::env;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Extension, Router,
    routing::{delete, get, post},
};
use redis::Client as RedisClient;
use tower_http::trace::TraceLayer;

use crate::allocate::ShortCodeAllocator;
use crate::analytics::AnalyticsRecorder;
use crate::cache::{LinkCache, RedisCache};
use crate::moderation::ModerationGate;
use crate::quota::QuotaLedger;
use crate::resolve::RedirectResolver;
use crate::store::{LinkStore, MongoStore};

/// Shared per-request state. Components are cheap clones over the same two
/// trait objects: the durable store and the fast lookup cache.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn LinkStore>,
    pub cache: Arc<dyn LinkCache>,
    pub resolver: RedirectResolver,
    pub recorder: AnalyticsRecorder,
    pub ledger: QuotaLedger,
    pub allocator: ShortCodeAllocator,
    pub gate: ModerationGate,
}

impl AppState {
    #[must_use]
    pub fn new(
        store: Arc<dyn LinkStore>,
        cache: Arc<dyn LinkCache>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            resolver: RedirectResolver::new(store.clone(), cache.clone(), store_timeout),
            recorder: AnalyticsRecorder::new(store.clone(), store_timeout),
            ledger: QuotaLedger::new(store.clone()),
            allocator: ShortCodeAllocator::new(store.clone()),
            gate: ModerationGate::new(store.clone(), cache.clone()),
            store,
            cache,
        }
    }
}

#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/links",
            post(routes::create_link).get(routes::list_links),
        )
        .route(
            "/api/links/{id}",
            get(routes::get_link)
                .patch(routes::update_link_status)
                .delete(routes::delete_link),
        )
        .route("/api/links/{id}/stats", get(routes::link_stats))
        .route(
            "/api/moderation/blacklist",
            post(routes::block_destination).get(routes::list_blacklist),
        )
        .route(
            "/api/moderation/blacklist/{id}",
            delete(routes::remove_blacklist_entry),
        )
        .route("/{code}", get(routes::redirect))
        .layer(Extension(state))
        .layer(TraceLayer::new_for_http())
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

/// Sets up the durable store, the cache and the router.
///
/// # Panics
///
/// If a required environment variable is missing or a backend is unreachable.
pub async fn setup() -> Router {
    let mongodb_url =
        env::var("MONGODB_URL").expect("Expected MONGODB_URL as an environment variable");
    let redis_url = env::var("REDIS_URL").expect("Expected REDIS_URL as an environment variable");

    let store = MongoStore::connect(&mongodb_url).await.unwrap();
    store.ensure_indexes().await.unwrap();

    let redis = RedisClient::open(redis_url).unwrap();
    let conn = redis.get_multiplexed_async_connection().await.unwrap();
    let cache = RedisCache::new(conn, env_u64("CACHE_TTL_SECS", 300));

    let state = AppState::new(
        Arc::new(store),
        Arc::new(cache),
        Duration::from_millis(env_u64("STORE_TIMEOUT_MS", 2_000)),
    );
    router(state)
}

#[cfg(test)]
pub(crate) fn test_router(store: Arc<store::MemoryStore>) -> Router {
    let cache = Arc::new(cache::MemoryCache::new(Duration::from_secs(60)));
    router(AppState::new(store, cache, Duration::from_millis(500)))
}
