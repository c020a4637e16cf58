//! Token resolver — read-through, two-tier lookup of device tokens.
//!
//! Cache first, store on miss, with the store's answers written back so
//! subsequent batches hit the cache. The cache is an optimization: losing it
//! degrades to store-only resolution, never to wrong answers.

use std::collections::HashMap;
use std::sync::Arc;

use matchcast_common::error::AppError;

use crate::cache::TokenCache;
use crate::store::TokenStore;

pub struct TokenResolver {
    cache: Arc<dyn TokenCache>,
    store: Arc<dyn TokenStore>,
    max_batch_size: usize,
}

impl TokenResolver {
    pub fn new(
        cache: Arc<dyn TokenCache>,
        store: Arc<dyn TokenStore>,
        max_batch_size: usize,
    ) -> Self {
        Self {
            cache,
            store,
            max_batch_size,
        }
    }

    /// Resolve user ids to device tokens, tolerating partial resolution.
    ///
    /// Ids with no token in either tier are silently absent from the result:
    /// a user with no registered device receives no notification. A store
    /// failure is a hard error for this batch only.
    pub async fn resolve(&self, user_ids: &[String]) -> Result<HashMap<String, String>, AppError> {
        if user_ids.is_empty() {
            return Ok(HashMap::new());
        }
        if user_ids.len() > self.max_batch_size {
            return Err(AppError::Validation(format!(
                "resolve batch of {} exceeds maximum of {}",
                user_ids.len(),
                self.max_batch_size
            )));
        }

        let mut found = match self.cache.get_many(user_ids).await {
            Ok(hits) => hits,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "Token cache read failed, treating the whole batch as missing"
                );
                HashMap::new()
            }
        };

        let missing: Vec<String> = user_ids
            .iter()
            .filter(|id| !found.contains_key(*id))
            .cloned()
            .collect();

        if !missing.is_empty() {
            let rows = self.store.find_tokens_by_user_ids(&missing).await?;

            // Rows arrive oldest first, so the newest registration wins the
            // one-token-per-user collapse.
            let mut fetched: HashMap<String, String> = HashMap::with_capacity(rows.len());
            for row in rows {
                fetched.insert(row.user_id, row.token);
            }

            if !fetched.is_empty() {
                if let Err(e) = self.cache.set_many(&fetched).await {
                    tracing::warn!(
                        error = %e,
                        entries = fetched.len(),
                        "Cache repopulation failed; resolution continues"
                    );
                }
            }

            found.extend(fetched);
        }

        tracing::debug!(
            requested = user_ids.len(),
            resolved = found.len(),
            "Resolved device tokens"
        );

        Ok(found)
    }
}
