use std::sync::Arc;

use rand::{Rng, distributions::Alphanumeric, thread_rng};

use crate::error::ServiceError;
use crate::models::Link;
use crate::store::{LinkStore, StoreError};

/// 62^7 ≈ 3.5e12 codes; at realistic link volumes the per-insert collision
/// probability stays far below the retry bound.
pub const GENERATED_CODE_LEN: usize = 7;
pub const MAX_GENERATION_ATTEMPTS: usize = 8;

#[must_use]
pub fn generate_code() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(GENERATED_CODE_LEN)
        .map(char::from)
        .collect()
}

/// Allocates a short code by probe-inserting into the store; the store's
/// unique constraint on live codes is the arbiter, never a read-then-write.
#[derive(Clone)]
pub struct ShortCodeAllocator {
    store: Arc<dyn LinkStore>,
}

impl ShortCodeAllocator {
    #[must_use]
    pub fn new(store: Arc<dyn LinkStore>) -> Self {
        Self { store }
    }

    /// Caller-chosen code: a collision surfaces as Conflict and the caller
    /// decides whether to retry with another code.
    pub async fn insert_with_code(
        &self,
        mut link: Link,
        code: String,
    ) -> Result<Link, ServiceError> {
        link.short_code = code;
        match self.store.insert_link(&link).await {
            Ok(()) => Ok(link),
            Err(StoreError::DuplicateCode) => Err(ServiceError::Conflict(format!(
                "short code '{}' is already in use",
                link.short_code
            ))),
            Err(err) => Err(err.into()),
        }
    }

    /// Generated code: regenerate on collision up to the attempt bound, then
    /// surface exhaustion.
    pub async fn insert_with_generated_code(
        &self,
        mut link: Link,
    ) -> Result<Link, ServiceError> {
        for attempt in 1..=MAX_GENERATION_ATTEMPTS {
            link.short_code = generate_code();
            match self.store.insert_link(&link).await {
                Ok(()) => return Ok(link),
                Err(StoreError::DuplicateCode) => {
                    tracing::debug!(
                        attempt,
                        code = %link.short_code,
                        "generated short code collided, regenerating"
                    );
                }
                Err(err) => return Err(err.into()),
            }
        }
        tracing::error!(
            attempts = MAX_GENERATION_ATTEMPTS,
            "short code allocation exhausted"
        );
        Err(ServiceError::Storage(format!(
            "short code allocation exhausted after {MAX_GENERATION_ATTEMPTS} attempts"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use url::Url;
    use uuid::Uuid;

    fn link() -> Link {
        Link::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Url::parse("https://example.com").unwrap(),
            None,
            None,
        )
    }

    #[test]
    fn generated_codes_are_alphanumeric_and_fixed_length() {
        for _ in 0..100 {
            let code = generate_code();
            assert_eq!(code.len(), GENERATED_CODE_LEN);
            assert!(code.chars().all(|ch| ch.is_ascii_alphanumeric()));
        }
    }

    #[tokio::test]
    async fn custom_code_collision_is_a_conflict() {
        let store = Arc::new(MemoryStore::new());
        let allocator = ShortCodeAllocator::new(store);
        allocator
            .insert_with_code(link(), "demo01".to_string())
            .await
            .unwrap();
        let err = allocator
            .insert_with_code(link(), "demo01".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
    }

    #[tokio::test]
    async fn generated_allocation_succeeds_and_fills_the_code() {
        let store = Arc::new(MemoryStore::new());
        let allocator = ShortCodeAllocator::new(store.clone());
        let created = allocator.insert_with_generated_code(link()).await.unwrap();
        assert_eq!(created.short_code.len(), GENERATED_CODE_LEN);
        let found = store
            .live_link_by_code(&created.short_code)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, created.id);
    }
}
