//! Cache adapter — Redis-backed device-token lookup.
//!
//! Holds a denormalized `user_id -> token` copy of the durable store, used
//! only for delivery. Entries expire after a configurable TTL; the resolver
//! repopulates them on miss. Never the source of truth.

use std::collections::HashMap;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use matchcast_common::error::AppError;

/// Bulk token lookup over a fast key/value cache.
///
/// Implementations must tolerate partial misses: `get_many` returns whatever
/// subset of the requested ids it knows about.
#[async_trait]
pub trait TokenCache: Send + Sync {
    /// Look up tokens for the given user ids. Ids without a cache entry are
    /// simply absent from the result.
    async fn get_many(&self, user_ids: &[String]) -> Result<HashMap<String, String>, AppError>;

    /// Store a `user_id -> token` mapping for each entry.
    async fn set_many(&self, tokens: &HashMap<String, String>) -> Result<(), AppError>;

    /// Remove the cached token for one user.
    async fn delete(&self, user_id: &str) -> Result<(), AppError>;
}

/// Redis implementation of [`TokenCache`].
pub struct RedisTokenCache {
    redis: ConnectionManager,
    ttl_seconds: u64,
}

impl RedisTokenCache {
    pub fn new(redis: ConnectionManager, ttl_seconds: u64) -> Self {
        Self { redis, ttl_seconds }
    }

    fn key_for(user_id: &str) -> String {
        format!("device:token:{user_id}")
    }
}

#[async_trait]
impl TokenCache for RedisTokenCache {
    async fn get_many(&self, user_ids: &[String]) -> Result<HashMap<String, String>, AppError> {
        if user_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let keys: Vec<String> = user_ids.iter().map(|id| Self::key_for(id)).collect();

        let mut conn = self.redis.clone();
        // MGET returns a slot per key; misses come back as nil.
        let values: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut conn)
            .await?;

        let found = user_ids
            .iter()
            .zip(values)
            .filter_map(|(id, value)| value.map(|token| (id.clone(), token)))
            .collect();

        Ok(found)
    }

    async fn set_many(&self, tokens: &HashMap<String, String>) -> Result<(), AppError> {
        if tokens.is_empty() {
            return Ok(());
        }

        let mut pipe = redis::pipe();
        for (user_id, token) in tokens {
            pipe.set_ex(Self::key_for(user_id), token, self.ttl_seconds)
                .ignore();
        }

        let mut conn = self.redis.clone();
        pipe.query_async::<()>(&mut conn).await?;

        tracing::debug!(entries = tokens.len(), "Cached device tokens");
        Ok(())
    }

    async fn delete(&self, user_id: &str) -> Result<(), AppError> {
        let mut conn = self.redis.clone();
        conn.del::<_, ()>(Self::key_for(user_id)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_prefix() {
        assert_eq!(
            RedisTokenCache::key_for("user-42"),
            "device:token:user-42"
        );
    }
}
