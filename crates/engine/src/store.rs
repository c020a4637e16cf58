//! Token store adapter — the durable home of device push tokens.
//!
//! PostgreSQL owns the `device_tokens` table; the Redis cache only ever holds
//! a copy derived from it.

use async_trait::async_trait;
use sqlx::PgPool;

use matchcast_common::error::AppError;
use matchcast_common::types::DeviceToken;

/// Durable lookup and removal of device tokens by user id.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Fetch all token rows for the given user ids, oldest first. Users with
    /// no registered device simply contribute no rows.
    async fn find_tokens_by_user_ids(
        &self,
        user_ids: &[String],
    ) -> Result<Vec<DeviceToken>, AppError>;

    /// Remove every token registered to one user, inside a single
    /// transaction.
    async fn delete_by_user_id(&self, user_id: &str) -> Result<(), AppError>;
}

/// PostgreSQL implementation of [`TokenStore`].
pub struct PgTokenStore {
    pool: PgPool,
}

impl PgTokenStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TokenStore for PgTokenStore {
    async fn find_tokens_by_user_ids(
        &self,
        user_ids: &[String],
    ) -> Result<Vec<DeviceToken>, AppError> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }

        // Ordered by created_at so that when the resolver collapses rows into
        // one token per user, the newest registration wins.
        let tokens: Vec<DeviceToken> = sqlx::query_as(
            r#"
            SELECT id, user_id, token, platform, created_at
            FROM device_tokens
            WHERE user_id = ANY($1)
            ORDER BY created_at
            "#,
        )
        .bind(user_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(tokens)
    }

    async fn delete_by_user_id(&self, user_id: &str) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query("DELETE FROM device_tokens WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::info!(
            user_id = %user_id,
            rows = result.rows_affected(),
            "Device tokens removed from store"
        );

        Ok(())
    }
}
