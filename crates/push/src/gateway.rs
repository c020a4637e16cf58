//! The gateway contract: one send per device token, with a structured error
//! that carries enough of the gateway's status/reason to be classified
//! without string sniffing.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Structured failure from a push gateway send.
///
/// Each variant corresponds to one class of gateway response; the dispatch
/// engine maps these onto its retry/invalidation policy.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The device token is unknown to the gateway (app uninstalled,
    /// token rotated away).
    #[error("device token is not registered")]
    Unregistered,

    /// The gateway rejected the request payload, typically a malformed token.
    #[error("gateway rejected the request: {0}")]
    InvalidArgument(String),

    /// The gateway credential itself was rejected.
    #[error("gateway credential rejected (HTTP {status})")]
    Unauthenticated { status: u16 },

    /// Message-rate or quota condition.
    #[error("gateway rate limited the sender")]
    QuotaExceeded { retry_after: Option<Duration> },

    /// Transient server-side condition (HTTP 5xx).
    #[error("gateway unavailable (HTTP {status})")]
    Unavailable { status: u16 },

    /// The request timed out before the gateway answered.
    #[error("gateway request timed out")]
    Timeout,

    /// The gateway could not be reached at all.
    #[error("gateway connection failed: {0}")]
    Connect(String),

    /// Any other transport-level failure (TLS, body decode, ...).
    #[error("gateway transport error: {0}")]
    Transport(String),

    /// A response outside the known status set.
    #[error("unexpected gateway response (HTTP {status}): {body}")]
    Unexpected { status: u16, body: String },
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::Timeout
        } else if err.is_connect() {
            GatewayError::Connect(err.to_string())
        } else {
            GatewayError::Transport(err.to_string())
        }
    }
}

/// A client that can deliver one notification to one device token.
///
/// Implementations must be safe for concurrent use by the dispatch worker
/// pool. Returns the gateway-assigned message id on success.
#[async_trait]
pub trait PushGateway: Send + Sync {
    async fn send(
        &self,
        token: &str,
        title: &str,
        body: &str,
        data: &HashMap<String, String>,
    ) -> Result<String, GatewayError>;
}
