use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Device platform a push token belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum Platform {
    Ios,
    Android,
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Platform::Ios => write!(f, "ios"),
            Platform::Android => write!(f, "android"),
        }
    }
}

/// One registered push-capable device. Owned by the durable store; the cache
/// holds a denormalized `user_id -> token` copy used only for delivery.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DeviceToken {
    pub id: Uuid,
    pub user_id: String,
    pub token: String,
    pub platform: Platform,
    pub created_at: DateTime<Utc>,
}

/// One "similar photo detected" match record: a photo plus the users whose
/// library it matched against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhotoMatch {
    pub photo_id: String,
    pub matched_user_ids: Vec<String>,
}

/// Ephemeral work item consumed by exactly one dispatch worker. Created when
/// a fan-out run starts, discarded once the job reaches a terminal state.
#[derive(Debug, Clone)]
pub struct NotificationJob {
    pub user_id: String,
    pub token: String,
    pub message_body: String,
}

/// Classified result of one send attempt. Drives the retry/invalidation
/// policy; logged and acted upon, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Success,
    InvalidToken,
    Retryable,
    RateLimited,
    AuthError,
    Unknown,
}

impl std::fmt::Display for DeliveryOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryOutcome::Success => write!(f, "success"),
            DeliveryOutcome::InvalidToken => write!(f, "invalid_token"),
            DeliveryOutcome::Retryable => write!(f, "retryable"),
            DeliveryOutcome::RateLimited => write!(f, "rate_limited"),
            DeliveryOutcome::AuthError => write!(f, "auth_error"),
            DeliveryOutcome::Unknown => write!(f, "unknown"),
        }
    }
}
