//! Token invalidator — removes a dead token from both tiers.
//!
//! Store first, cache second. The store deletion commits inside its own
//! transaction before the cache entry is touched, so a crash between the two
//! leaves the cache stale rather than the store: a stale cache entry costs at
//! most one more wasted, correctly-classified send.

use std::sync::Arc;

use matchcast_common::error::AppError;

use crate::cache::TokenCache;
use crate::store::TokenStore;

pub struct TokenInvalidator {
    store: Arc<dyn TokenStore>,
    cache: Arc<dyn TokenCache>,
}

impl TokenInvalidator {
    pub fn new(store: Arc<dyn TokenStore>, cache: Arc<dyn TokenCache>) -> Self {
        Self { store, cache }
    }

    /// Remove every token registered to `user_id` from the store, then drop
    /// the cached copy.
    pub async fn invalidate(&self, user_id: &str) -> Result<(), AppError> {
        self.store.delete_by_user_id(user_id).await?;

        if let Err(e) = self.cache.delete(user_id).await {
            tracing::warn!(
                user_id = %user_id,
                error = %e,
                "Cache delete failed after store removal; entry expires via TTL"
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{MemoryCache, MemoryStore};
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn test_invalidate_removes_from_store_and_cache() {
        let store = Arc::new(MemoryStore::with_tokens(&[("user-1", "tok-1")]));
        let cache = Arc::new(MemoryCache::with_entries(&[("user-1", "tok-1")]));
        let invalidator = TokenInvalidator::new(store.clone(), cache.clone());

        invalidator.invalidate("user-1").await.unwrap();

        assert!(!store.contains("user-1"));
        assert!(!cache.contains("user-1"));
    }

    #[tokio::test]
    async fn test_cache_delete_failure_is_tolerated() {
        let store = Arc::new(MemoryStore::with_tokens(&[("user-1", "tok-1")]));
        let cache = Arc::new(MemoryCache::with_entries(&[("user-1", "tok-1")]));
        cache.fail_writes.store(true, Ordering::SeqCst);
        let invalidator = TokenInvalidator::new(store.clone(), cache.clone());

        invalidator.invalidate("user-1").await.unwrap();

        assert!(!store.contains("user-1"));
        // The stale cache entry survives until its TTL.
        assert!(cache.contains("user-1"));
    }

    #[tokio::test]
    async fn test_store_failure_leaves_cache_untouched() {
        let store = Arc::new(MemoryStore::with_tokens(&[("user-1", "tok-1")]));
        store.fail_user("user-1");
        let cache = Arc::new(MemoryCache::with_entries(&[("user-1", "tok-1")]));
        let invalidator = TokenInvalidator::new(store.clone(), cache.clone());

        let result = invalidator.invalidate("user-1").await;

        assert!(result.is_err());
        assert!(cache.contains("user-1"));
        assert!(cache.deletes.lock().unwrap().is_empty());
    }
}
