//! Dispatch engine — bounded-concurrency notification delivery.
//!
//! A fixed pool of worker tasks drains a shared job queue. Each worker runs
//! one job to a terminal state: send, classify, then finish, retry after a
//! backoff, or invalidate the token. A worker sleeping through a backoff
//! blocks only itself; the rest of the pool keeps draining the queue.
//!
//! Jobs are abandoned (not persisted) on cancellation; the only durable side
//! effect of a run is token invalidation.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use matchcast_common::error::AppError;
use matchcast_common::types::{DeliveryOutcome, NotificationJob};
use matchcast_push::{GatewayError, PushGateway};

use crate::invalidator::TokenInvalidator;
use crate::outcome::classify;

/// Fixed notification title; the body carries the per-user match count.
const NOTIFICATION_TITLE: &str = "Similar photos found";

/// Largest exponent applied to the base backoff.
const MAX_BACKOFF_SHIFT: u32 = 16;

/// Tunables for the worker pool and retry policy.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Number of concurrent worker tasks.
    pub workers: usize,
    /// Delivery attempts per job, including the first.
    pub max_attempts: u32,
    /// Initial retry backoff, doubled per attempt.
    pub base_backoff: Duration,
    /// Minimum backoff after a rate-limited response.
    pub rate_limited_backoff: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: 10,
            max_attempts: 3,
            base_backoff: Duration::from_millis(500),
            rate_limited_backoff: Duration::from_secs(2),
        }
    }
}

/// Per-run delivery counters. Merged from per-worker locals after join.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Notifications accepted by the gateway.
    pub sent: u64,
    /// Jobs skipped before enqueue (zero match count).
    pub skipped: u64,
    /// Retry attempts scheduled after a transient failure.
    pub retried: u64,
    /// Jobs dropped after exhausting the attempt ceiling.
    pub dropped: u64,
    /// Jobs terminated by token invalidation.
    pub invalidated: u64,
    /// Jobs terminated by auth or unclassified failures.
    pub failed: u64,
}

impl DispatchStats {
    pub fn merge(&mut self, other: DispatchStats) {
        self.sent += other.sent;
        self.skipped += other.skipped;
        self.retried += other.retried;
        self.dropped += other.dropped;
        self.invalidated += other.invalidated;
        self.failed += other.failed;
    }
}

pub struct DispatchEngine {
    gateway: Arc<dyn PushGateway>,
    invalidator: Arc<TokenInvalidator>,
    config: DispatchConfig,
}

impl DispatchEngine {
    pub fn new(
        gateway: Arc<dyn PushGateway>,
        invalidator: Arc<TokenInvalidator>,
        config: DispatchConfig,
    ) -> Result<Self, AppError> {
        if config.workers == 0 {
            return Err(AppError::Validation(
                "dispatch worker count must be positive".into(),
            ));
        }
        if config.max_attempts == 0 {
            return Err(AppError::Validation(
                "dispatch max attempts must be positive".into(),
            ));
        }
        Ok(Self {
            gateway,
            invalidator,
            config,
        })
    }

    /// Deliver one notification per resolved `(user_id, token)` pair and
    /// return once every job is terminal or cancellation is observed.
    ///
    /// Pairs whose match count is zero or absent are skipped without a send.
    pub async fn dispatch(
        &self,
        resolved: Vec<(String, String)>,
        counts: &HashMap<String, u64>,
        cancel: &CancellationToken,
    ) -> DispatchStats {
        let mut stats = DispatchStats::default();

        let mut jobs = Vec::with_capacity(resolved.len());
        for (user_id, token) in resolved {
            let count = counts.get(&user_id).copied().unwrap_or(0);
            if count == 0 {
                debug!(user_id = %user_id, "No matches this batch, skipping notification");
                stats.skipped += 1;
                continue;
            }
            jobs.push(NotificationJob {
                user_id,
                token,
                message_body: format_body(count),
            });
        }

        if jobs.is_empty() {
            return stats;
        }

        let job_count = jobs.len();
        let (tx, rx) = mpsc::channel(job_count);
        for job in jobs {
            // Capacity equals the job count, so the queue never refuses.
            let _ = tx.try_send(job);
        }
        drop(tx);
        let queue = Arc::new(Mutex::new(rx));

        let auth_escalated = Arc::new(AtomicBool::new(false));
        let workers = self.config.workers.min(job_count);

        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let ctx = WorkerContext {
                worker_id,
                queue: queue.clone(),
                gateway: self.gateway.clone(),
                invalidator: self.invalidator.clone(),
                config: self.config.clone(),
                cancel: cancel.clone(),
                auth_escalated: auth_escalated.clone(),
            };
            handles.push(tokio::spawn(ctx.run()));
        }

        for handle in handles {
            if let Ok(worker_stats) = handle.await {
                stats.merge(worker_stats);
            }
        }

        stats
    }
}

/// Everything one worker task needs, moved into its spawn.
struct WorkerContext {
    worker_id: usize,
    queue: Arc<Mutex<mpsc::Receiver<NotificationJob>>>,
    gateway: Arc<dyn PushGateway>,
    invalidator: Arc<TokenInvalidator>,
    config: DispatchConfig,
    cancel: CancellationToken,
    auth_escalated: Arc<AtomicBool>,
}

impl WorkerContext {
    async fn run(self) -> DispatchStats {
        let mut stats = DispatchStats::default();

        loop {
            // The lock is held only while waiting for the next job, not
            // while delivering it.
            let job = {
                let mut rx = self.queue.lock().await;
                tokio::select! {
                    _ = self.cancel.cancelled() => None,
                    job = rx.recv() => job,
                }
            };

            let Some(job) = job else {
                debug!(worker_id = self.worker_id, "Dispatch worker exiting");
                break;
            };

            if !self.run_job(&job, &mut stats).await {
                // Cancelled mid-job; the job and any still-queued ones are
                // abandoned.
                break;
            }
        }

        stats
    }

    /// Drive one job to a terminal state. Returns `false` if cancellation
    /// interrupted it first.
    async fn run_job(&self, job: &NotificationJob, stats: &mut DispatchStats) -> bool {
        let data = payload_data();
        let mut attempt = 1u32;

        loop {
            let result = tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!(
                        worker_id = self.worker_id,
                        user_id = %job.user_id,
                        "Cancelled mid-job, abandoning"
                    );
                    return false;
                }
                result = self.gateway.send(
                    &job.token,
                    NOTIFICATION_TITLE,
                    &job.message_body,
                    &data,
                ) => result,
            };

            let err = match result {
                Ok(message_id) => {
                    debug!(
                        user_id = %job.user_id,
                        message_id = %message_id,
                        attempt,
                        "Notification delivered"
                    );
                    stats.sent += 1;
                    return true;
                }
                Err(err) => err,
            };

            let outcome = classify(&err);
            match outcome {
                DeliveryOutcome::InvalidToken => {
                    // Remove the token before marking the job terminal so it
                    // cannot be resolved again within this run.
                    if let Err(e) = self.invalidator.invalidate(&job.user_id).await {
                        warn!(user_id = %job.user_id, error = %e, "Token invalidation failed");
                    }
                    debug!(user_id = %job.user_id, "Dead token invalidated");
                    stats.invalidated += 1;
                    return true;
                }
                DeliveryOutcome::AuthError => {
                    // One operator-level alert per run, not one per job.
                    if !self.auth_escalated.swap(true, Ordering::SeqCst) {
                        error!(
                            error = %err,
                            "Push gateway rejected our credential; deliveries are failing"
                        );
                    } else {
                        debug!(user_id = %job.user_id, "Credential rejection (already escalated)");
                    }
                    stats.failed += 1;
                    return true;
                }
                DeliveryOutcome::Unknown => {
                    error!(
                        user_id = %job.user_id,
                        error = ?err,
                        "Unclassified gateway failure, dropping without retry"
                    );
                    stats.failed += 1;
                    return true;
                }
                DeliveryOutcome::Retryable | DeliveryOutcome::RateLimited => {
                    if attempt >= self.config.max_attempts {
                        warn!(
                            user_id = %job.user_id,
                            attempts = attempt,
                            error = %err,
                            "Retries exhausted, dropping notification"
                        );
                        stats.dropped += 1;
                        return true;
                    }

                    let retry_after = match &err {
                        GatewayError::QuotaExceeded { retry_after } => *retry_after,
                        _ => None,
                    };
                    let delay = backoff_delay(&self.config, outcome, attempt, retry_after);
                    debug!(
                        user_id = %job.user_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        outcome = %outcome,
                        "Transient delivery failure, backing off"
                    );
                    stats.retried += 1;
                    attempt += 1;

                    tokio::select! {
                        _ = self.cancel.cancelled() => return false,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                DeliveryOutcome::Success => {
                    unreachable!("send errors never classify as success")
                }
            }
        }
    }
}

/// Notification body for a non-zero match count.
fn format_body(count: u64) -> String {
    if count == 1 {
        "1 similar photo found".to_string()
    } else {
        format!("{count} similar photos found")
    }
}

/// Key/value payload attached to every notification.
fn payload_data() -> HashMap<String, String> {
    HashMap::from([("kind".to_string(), "similar_photos".to_string())])
}

/// Backoff before attempt `attempt + 1`: exponential from the base, with a
/// configurable floor for rate-limited responses, raised further to any
/// gateway-provided `Retry-After`.
fn backoff_delay(
    config: &DispatchConfig,
    outcome: DeliveryOutcome,
    attempt: u32,
    retry_after: Option<Duration>,
) -> Duration {
    let exponential = config
        .base_backoff
        .saturating_mul(1 << (attempt - 1).min(MAX_BACKOFF_SHIFT));

    match outcome {
        DeliveryOutcome::RateLimited => {
            let floor = exponential.max(config.rate_limited_backoff);
            retry_after.map_or(floor, |hint| floor.max(hint))
        }
        _ => exponential,
    }
}
