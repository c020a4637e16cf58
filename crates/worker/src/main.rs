use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use matchcast_common::config::AppConfig;
use matchcast_common::{db, redis_pool};
use matchcast_engine::cache::RedisTokenCache;
use matchcast_engine::dispatcher::{DispatchConfig, DispatchEngine};
use matchcast_engine::fanout::{FanoutConfig, NotificationFanout};
use matchcast_engine::invalidator::TokenInvalidator;
use matchcast_engine::resolver::TokenResolver;
use matchcast_engine::store::PgTokenStore;
use matchcast_push::{FcmClient, FcmConfig};
use matchcast_worker::queue::MatchQueue;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "matchcast_worker=info,matchcast_engine=info".into()),
        )
        .json()
        .init();

    tracing::info!("Matchcast fan-out worker starting...");

    // Load configuration
    let config = AppConfig::from_env()?;

    // Connect to database
    let pool = db::create_pool(&config.database_url, config.db_max_connections).await?;

    // Run migrations
    sqlx::migrate!("../../migrations").run(&pool).await?;
    tracing::info!("Database migrations applied");

    // Connect to Redis
    let redis = redis_pool::create_redis_pool(&config.redis_url).await?;

    // Wire the engine: gateway client, adapters, invalidator, resolver,
    // dispatcher, fan-out.
    let gateway = Arc::new(
        FcmClient::new(FcmConfig {
            base_url: config.push_gateway_url.clone(),
            project_id: config.push_project_id.clone(),
            auth_token: config.push_gateway_token.clone(),
        })
        .map_err(|e| anyhow::anyhow!("failed to build push gateway client: {e}"))?,
    );

    let cache = Arc::new(RedisTokenCache::new(
        redis.clone(),
        config.token_cache_ttl_secs,
    ));
    let store = Arc::new(PgTokenStore::new(pool.clone()));
    let invalidator = Arc::new(TokenInvalidator::new(store.clone(), cache.clone()));

    let resolver = TokenResolver::new(cache, store, config.resolve_batch_size);
    let dispatcher = DispatchEngine::new(
        gateway,
        invalidator,
        DispatchConfig {
            workers: config.dispatch_workers,
            max_attempts: config.dispatch_max_attempts,
            base_backoff: Duration::from_millis(config.dispatch_base_backoff_ms),
            rate_limited_backoff: Duration::from_millis(config.dispatch_rate_limit_backoff_ms),
        },
    )?;
    let fanout = NotificationFanout::new(
        resolver,
        dispatcher,
        FanoutConfig {
            batch_size: config.resolve_batch_size,
            batch_timeout: Duration::from_secs(config.batch_timeout_secs),
        },
    )?;

    let queue = MatchQueue::new(redis, config.match_queue_key.clone());
    let poll_interval = Duration::from_millis(config.queue_poll_interval_ms);
    let cancel = CancellationToken::new();

    tracing::info!(
        queue = %config.match_queue_key,
        poll_interval_ms = config.queue_poll_interval_ms,
        "Match intake loop starting"
    );

    // Run with graceful shutdown on Ctrl+C
    tokio::select! {
        result = intake_loop(&queue, &fanout, poll_interval, &cancel) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Intake loop exited with error");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal, stopping gracefully...");
            cancel.cancel();
        }
    }

    tracing::info!("Matchcast fan-out worker stopped.");
    Ok(())
}

/// Poll the queue and drive one fan-out run per batch, sequentially.
///
/// A failed run is logged and the loop moves on; only infrastructure errors
/// from the queue itself pause the intake until the next poll.
async fn intake_loop(
    queue: &MatchQueue,
    fanout: &NotificationFanout,
    poll_interval: Duration,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    loop {
        if cancel.is_cancelled() {
            return Ok(());
        }

        match queue.pop_batch().await {
            Ok(Some(matches)) => {
                tracing::info!(records = matches.len(), "Match batch received");
                match fanout.run(matches, cancel).await {
                    Ok(report) => tracing::info!(
                        users = report.users_matched,
                        resolved = report.users_resolved,
                        sent = report.stats.sent,
                        dropped = report.stats.dropped,
                        invalidated = report.stats.invalidated,
                        "Fan-out run complete"
                    ),
                    Err(e) => tracing::error!(error = %e, "Fan-out run failed"),
                }
            }
            Ok(None) => {
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(()),
                    _ = tokio::time::sleep(poll_interval) => {}
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Queue poll failed, retrying after interval");
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(()),
                    _ = tokio::time::sleep(poll_interval) => {}
                }
            }
        }
    }
}
