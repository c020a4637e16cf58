//! Match queue intake — the Redis list upstream photo matching pushes
//! JSON-encoded batches onto.
//!
//! Malformed entries are logged and dropped; a poison payload must never
//! wedge the intake loop.

use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use matchcast_common::error::AppError;
use matchcast_common::types::PhotoMatch;

pub struct MatchQueue {
    redis: ConnectionManager,
    key: String,
}

impl MatchQueue {
    pub fn new(redis: ConnectionManager, key: String) -> Self {
        Self { redis, key }
    }

    /// Pop the next match batch, skipping over malformed entries.
    ///
    /// Returns `Ok(None)` once the queue is empty.
    pub async fn pop_batch(&self) -> Result<Option<Vec<PhotoMatch>>, AppError> {
        let mut conn = self.redis.clone();

        loop {
            let raw: Option<String> = conn.lpop(&self.key, None).await?;
            let Some(raw) = raw else {
                return Ok(None);
            };

            match parse_batch(&raw) {
                Some(batch) => return Ok(Some(batch)),
                None => {
                    tracing::warn!(
                        queue = %self.key,
                        bytes = raw.len(),
                        "Dropping malformed match batch payload"
                    );
                }
            }
        }
    }
}

fn parse_batch(raw: &str) -> Option<Vec<PhotoMatch>> {
    match serde_json::from_str(raw) {
        Ok(batch) => Some(batch),
        Err(e) => {
            tracing::debug!(error = %e, "Match batch payload did not parse");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_batch() {
        let raw = r#"[
            {"photo_id": "p1", "matched_user_ids": ["A", "B"]},
            {"photo_id": "p2", "matched_user_ids": []}
        ]"#;

        let batch = parse_batch(raw).unwrap();

        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].photo_id, "p1");
        assert_eq!(batch[0].matched_user_ids, vec!["A", "B"]);
        assert!(batch[1].matched_user_ids.is_empty());
    }

    #[test]
    fn test_parse_rejects_invalid_json() {
        assert!(parse_batch("not json").is_none());
    }

    #[test]
    fn test_parse_rejects_wrong_shape() {
        assert!(parse_batch(r#"{"photo_id": "p1"}"#).is_none());
        assert!(parse_batch(r#"[{"photo_id": 7, "matched_user_ids": []}]"#).is_none());
    }
}
