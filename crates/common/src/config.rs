use serde::Deserialize;

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string
    pub redis_url: String,

    /// Base URL of the push gateway (overridable for staging/test gateways)
    pub push_gateway_url: String,

    /// Push gateway project identifier (used in the send endpoint path)
    pub push_project_id: String,

    /// Bearer credential presented to the push gateway
    pub push_gateway_token: String,

    /// Number of concurrent dispatch workers (default: 10)
    pub dispatch_workers: usize,

    /// Maximum delivery attempts per notification, including the first (default: 3)
    pub dispatch_max_attempts: u32,

    /// Initial retry backoff in milliseconds, doubled per attempt (default: 500)
    pub dispatch_base_backoff_ms: u64,

    /// Minimum backoff after a rate-limited response, in milliseconds (default: 2000)
    pub dispatch_rate_limit_backoff_ms: u64,

    /// Maximum user ids resolved per batch (default: 5000)
    pub resolve_batch_size: usize,

    /// Wall-clock budget for resolving and dispatching one batch, in seconds (default: 30)
    pub batch_timeout_secs: u64,

    /// TTL for cached device tokens, in seconds (default: 86400)
    pub token_cache_ttl_secs: u64,

    /// Redis list the worker consumes match batches from
    pub match_queue_key: String,

    /// Queue polling interval in milliseconds when the queue is empty (default: 1000)
    pub queue_poll_interval_ms: u64,

    /// Maximum number of PostgreSQL connections in the pool (default: 20)
    pub db_max_connections: u32,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?,
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            push_gateway_url: std::env::var("PUSH_GATEWAY_URL")
                .unwrap_or_else(|_| "https://fcm.googleapis.com".to_string()),
            push_project_id: std::env::var("PUSH_PROJECT_ID")
                .map_err(|_| anyhow::anyhow!("PUSH_PROJECT_ID environment variable is required"))?,
            push_gateway_token: std::env::var("PUSH_GATEWAY_TOKEN").map_err(|_| {
                anyhow::anyhow!("PUSH_GATEWAY_TOKEN environment variable is required")
            })?,
            dispatch_workers: std::env::var("DISPATCH_WORKERS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("DISPATCH_WORKERS must be a valid usize"))?,
            dispatch_max_attempts: std::env::var("DISPATCH_MAX_ATTEMPTS")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("DISPATCH_MAX_ATTEMPTS must be a valid u32"))?,
            dispatch_base_backoff_ms: std::env::var("DISPATCH_BASE_BACKOFF_MS")
                .unwrap_or_else(|_| "500".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("DISPATCH_BASE_BACKOFF_MS must be a valid u64"))?,
            dispatch_rate_limit_backoff_ms: std::env::var("DISPATCH_RATE_LIMIT_BACKOFF_MS")
                .unwrap_or_else(|_| "2000".to_string())
                .parse()
                .map_err(|_| {
                    anyhow::anyhow!("DISPATCH_RATE_LIMIT_BACKOFF_MS must be a valid u64")
                })?,
            resolve_batch_size: std::env::var("RESOLVE_BATCH_SIZE")
                .unwrap_or_else(|_| "5000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("RESOLVE_BATCH_SIZE must be a valid usize"))?,
            batch_timeout_secs: std::env::var("BATCH_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("BATCH_TIMEOUT_SECS must be a valid u64"))?,
            token_cache_ttl_secs: std::env::var("TOKEN_CACHE_TTL_SECS")
                .unwrap_or_else(|_| "86400".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("TOKEN_CACHE_TTL_SECS must be a valid u64"))?,
            match_queue_key: std::env::var("MATCH_QUEUE_KEY")
                .unwrap_or_else(|_| "matches:pending".to_string()),
            queue_poll_interval_ms: std::env::var("QUEUE_POLL_INTERVAL_MS")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("QUEUE_POLL_INTERVAL_MS must be a valid u64"))?,
            db_max_connections: std::env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("DB_MAX_CONNECTIONS must be a valid u32"))?,
        })
    }
}
