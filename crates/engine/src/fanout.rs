//! Fan-out orchestrator — the batch loop over aggregation, resolution, and
//! dispatch.
//!
//! Batches run strictly one after another to bound memory and in-flight
//! token count; concurrency lives inside the aggregator's shard workers and
//! the dispatcher's pool. A batch whose resolution fails or times out is
//! skipped and reported at the end; the rest of the run proceeds.

use std::collections::HashMap;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use matchcast_common::error::AppError;
use matchcast_common::types::PhotoMatch;

use crate::aggregator::aggregate_matches;
use crate::dispatcher::{DispatchEngine, DispatchStats};
use crate::resolver::TokenResolver;

#[derive(Debug, Clone)]
pub struct FanoutConfig {
    /// Maximum user ids resolved and dispatched per batch.
    pub batch_size: usize,
    /// Wall-clock budget for one batch's resolve + dispatch.
    pub batch_timeout: Duration,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            batch_size: 5000,
            batch_timeout: Duration::from_secs(30),
        }
    }
}

/// What one fan-out run did, returned to the caller and logged.
#[derive(Debug, Default)]
pub struct FanoutReport {
    /// Distinct users with at least one match in the input.
    pub users_matched: usize,
    /// Users for whom a device token was resolved.
    pub users_resolved: usize,
    /// Batches attempted.
    pub batches: usize,
    /// Batches skipped because resolution failed or timed out.
    pub failed_batches: usize,
    /// Merged delivery counters across all batches.
    pub stats: DispatchStats,
}

pub struct NotificationFanout {
    resolver: TokenResolver,
    dispatcher: DispatchEngine,
    config: FanoutConfig,
}

impl NotificationFanout {
    pub fn new(
        resolver: TokenResolver,
        dispatcher: DispatchEngine,
        config: FanoutConfig,
    ) -> Result<Self, AppError> {
        if config.batch_size == 0 {
            return Err(AppError::Validation("batch size must be positive".into()));
        }
        Ok(Self {
            resolver,
            dispatcher,
            config,
        })
    }

    /// Convert a batch of match records into delivered notifications.
    ///
    /// Returns `Err` only when at least one whole batch's resolution step
    /// failed; per-job delivery failures are logged and counted, never
    /// surfaced individually.
    pub async fn run(
        &self,
        matches: Vec<PhotoMatch>,
        cancel: &CancellationToken,
    ) -> Result<FanoutReport, AppError> {
        let record_count = matches.len();
        let counts = tokio::task::spawn_blocking(move || aggregate_matches(&matches))
            .await
            .map_err(|e| AppError::Internal(format!("aggregation task panicked: {e}")))?;

        let mut report = FanoutReport {
            users_matched: counts.len(),
            ..Default::default()
        };

        if counts.is_empty() {
            info!(records = record_count, "No users matched, nothing to deliver");
            return Ok(report);
        }

        // Sorted for deterministic batch composition.
        let mut user_ids: Vec<String> = counts.keys().cloned().collect();
        user_ids.sort_unstable();

        let total_batches = user_ids.len().div_ceil(self.config.batch_size);
        info!(
            records = record_count,
            users = user_ids.len(),
            batches = total_batches,
            "Fan-out run starting"
        );

        for (index, chunk) in user_ids.chunks(self.config.batch_size).enumerate() {
            if cancel.is_cancelled() {
                info!(
                    processed = index,
                    total = total_batches,
                    "Fan-out cancelled between batches"
                );
                break;
            }

            report.batches += 1;
            match tokio::time::timeout(
                self.config.batch_timeout,
                self.run_batch(chunk, &counts, cancel),
            )
            .await
            {
                Ok(Ok((resolved, stats))) => {
                    report.users_resolved += resolved;
                    report.stats.merge(stats);
                }
                Ok(Err(e)) => {
                    warn!(
                        batch = index,
                        users = chunk.len(),
                        error = %e,
                        "Batch resolution failed, skipping its users"
                    );
                    report.failed_batches += 1;
                }
                Err(_) => {
                    warn!(
                        batch = index,
                        users = chunk.len(),
                        timeout_ms = self.config.batch_timeout.as_millis() as u64,
                        "Batch timed out, skipping its users"
                    );
                    report.failed_batches += 1;
                }
            }
        }

        info!(
            users = report.users_matched,
            resolved = report.users_resolved,
            sent = report.stats.sent,
            dropped = report.stats.dropped,
            invalidated = report.stats.invalidated,
            failed_batches = report.failed_batches,
            "Fan-out run finished"
        );

        if report.failed_batches > 0 {
            return Err(AppError::Resolution {
                failed: report.failed_batches,
                total: report.batches,
            });
        }
        Ok(report)
    }

    async fn run_batch(
        &self,
        user_ids: &[String],
        counts: &HashMap<String, u64>,
        cancel: &CancellationToken,
    ) -> Result<(usize, DispatchStats), AppError> {
        let tokens = self.resolver.resolve(user_ids).await?;
        let resolved: Vec<(String, String)> = tokens.into_iter().collect();
        let resolved_count = resolved.len();

        let stats = self.dispatcher.dispatch(resolved, counts, cancel).await;
        Ok((resolved_count, stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::dispatcher::DispatchConfig;
    use crate::invalidator::TokenInvalidator;
    use crate::testutil::{MemoryCache, MemoryStore, ScriptedGateway, SendScript};

    fn record(photo_id: &str, users: &[&str]) -> PhotoMatch {
        PhotoMatch {
            photo_id: photo_id.to_string(),
            matched_user_ids: users.iter().map(|u| u.to_string()).collect(),
        }
    }

    fn fanout_with(
        gateway: Arc<ScriptedGateway>,
        store: Arc<MemoryStore>,
        cache: Arc<MemoryCache>,
        config: FanoutConfig,
    ) -> NotificationFanout {
        let invalidator = Arc::new(TokenInvalidator::new(store.clone(), cache.clone()));
        let resolver = TokenResolver::new(cache, store, config.batch_size);
        let dispatcher = DispatchEngine::new(
            gateway,
            invalidator,
            DispatchConfig {
                workers: 4,
                max_attempts: 3,
                base_backoff: Duration::from_millis(1),
                rate_limited_backoff: Duration::from_millis(2),
            },
        )
        .unwrap();
        NotificationFanout::new(resolver, dispatcher, config).unwrap()
    }

    #[tokio::test]
    async fn test_end_to_end_counts_resolution_and_bodies() {
        // Three photos matching [A,B], [B,C], [B]: counts A:1, B:3, C:1.
        // Tokens exist in the store only, and only for A and B.
        let gateway = Arc::new(ScriptedGateway::default());
        let store = Arc::new(MemoryStore::with_tokens(&[("A", "tok-a"), ("B", "tok-b")]));
        let cache = Arc::new(MemoryCache::default());
        let fanout = fanout_with(
            gateway.clone(),
            store,
            cache.clone(),
            FanoutConfig::default(),
        );

        let matches = vec![
            record("p1", &["A", "B"]),
            record("p2", &["B", "C"]),
            record("p3", &["B"]),
        ];

        let report = fanout
            .run(matches, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.users_matched, 3);
        assert_eq!(report.users_resolved, 2); // C has no device
        assert_eq!(report.stats.sent, 2);
        assert_eq!(
            gateway.body_sent_to("tok-a").as_deref(),
            Some("1 similar photo found")
        );
        assert_eq!(
            gateway.body_sent_to("tok-b").as_deref(),
            Some("3 similar photos found")
        );
        // Read-through repopulation.
        assert!(cache.contains("A"));
        assert!(cache.contains("B"));
        assert!(!cache.contains("C"));
    }

    #[tokio::test]
    async fn test_invalid_token_is_removed_while_others_deliver() {
        let gateway = Arc::new(ScriptedGateway::default());
        gateway.script("tok-b", &[SendScript::Unregistered]);
        let store = Arc::new(MemoryStore::with_tokens(&[("A", "tok-a"), ("B", "tok-b")]));
        let cache = Arc::new(MemoryCache::default());
        let fanout = fanout_with(
            gateway.clone(),
            store.clone(),
            cache.clone(),
            FanoutConfig::default(),
        );

        let matches = vec![record("p1", &["A", "B"])];

        let report = fanout
            .run(matches, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.stats.sent, 1);
        assert_eq!(report.stats.invalidated, 1);
        assert_eq!(gateway.calls_for("tok-b"), 1);
        assert!(!store.contains("B"));
        assert!(!cache.contains("B"));
    }

    #[tokio::test]
    async fn test_failed_batch_does_not_stop_the_rest() {
        let gateway = Arc::new(ScriptedGateway::default());
        let store = Arc::new(MemoryStore::with_tokens(&[("A", "tok-a"), ("B", "tok-b")]));
        store.fail_user("B");
        let cache = Arc::new(MemoryCache::default());
        // batch_size 1: A and B resolve in separate batches.
        let fanout = fanout_with(
            gateway.clone(),
            store,
            cache,
            FanoutConfig {
                batch_size: 1,
                ..Default::default()
            },
        );

        let matches = vec![record("p1", &["A"]), record("p2", &["B"])];

        let err = fanout
            .run(matches, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AppError::Resolution {
                failed: 1,
                total: 2
            }
        ));
        // A's batch still delivered.
        assert_eq!(gateway.calls_for("tok-a"), 1);
    }

    #[tokio::test]
    async fn test_empty_input_is_a_clean_no_op() {
        let gateway = Arc::new(ScriptedGateway::default());
        let fanout = fanout_with(
            gateway.clone(),
            Arc::new(MemoryStore::default()),
            Arc::new(MemoryCache::default()),
            FanoutConfig::default(),
        );

        let report = fanout
            .run(Vec::new(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.users_matched, 0);
        assert_eq!(report.batches, 0);
        assert!(gateway.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_before_run_processes_no_batches() {
        let gateway = Arc::new(ScriptedGateway::default());
        let store = Arc::new(MemoryStore::with_tokens(&[("A", "tok-a")]));
        let fanout = fanout_with(
            gateway.clone(),
            store,
            Arc::new(MemoryCache::default()),
            FanoutConfig::default(),
        );

        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = fanout
            .run(vec![record("p1", &["A"])], &cancel)
            .await
            .unwrap();

        assert_eq!(report.batches, 0);
        assert!(gateway.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_zero_batch_size_rejected() {
        let gateway = Arc::new(ScriptedGateway::default());
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::default());
        let cache: Arc<MemoryCache> = Arc::new(MemoryCache::default());
        let invalidator = Arc::new(TokenInvalidator::new(store.clone(), cache.clone()));
        let resolver = TokenResolver::new(cache, store, 5000);
        let dispatcher =
            DispatchEngine::new(gateway, invalidator, DispatchConfig::default()).unwrap();

        let result = NotificationFanout::new(
            resolver,
            dispatcher,
            FanoutConfig {
                batch_size: 0,
                ..Default::default()
            },
        );

        assert!(matches!(result, Err(AppError::Validation(_))));
    }
}
