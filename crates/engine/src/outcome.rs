//! Outcome classification — maps a structured gateway error onto the closed
//! [`DeliveryOutcome`] set that drives the retry/invalidation policy.
//!
//! The mapping is a pure function over the error's variant; no string
//! sniffing, no network access, unit-testable in isolation.

use matchcast_common::types::DeliveryOutcome;
use matchcast_push::GatewayError;

/// Classify one failed send attempt.
///
/// - `InvalidToken`: the token is malformed or no longer registered. Never
///   retried; the token is invalidated.
/// - `Retryable`: transient infrastructure condition. Retried with backoff
///   up to the attempt ceiling, then dropped.
/// - `RateLimited`: quota condition. Retried like `Retryable`, but with a
///   configurable minimum backoff.
/// - `AuthError`: the gateway credential itself was rejected. Terminal per
///   job, escalated once per run.
/// - `Unknown`: anything unclassified. Terminal without retry rather than
///   retrying blindly.
pub fn classify(error: &GatewayError) -> DeliveryOutcome {
    match error {
        GatewayError::Unregistered | GatewayError::InvalidArgument(_) => {
            DeliveryOutcome::InvalidToken
        }
        GatewayError::Unavailable { .. }
        | GatewayError::Timeout
        | GatewayError::Connect(_)
        | GatewayError::Transport(_) => DeliveryOutcome::Retryable,
        GatewayError::QuotaExceeded { .. } => DeliveryOutcome::RateLimited,
        GatewayError::Unauthenticated { .. } => DeliveryOutcome::AuthError,
        GatewayError::Unexpected { .. } => DeliveryOutcome::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_dead_tokens_classify_as_invalid() {
        assert_eq!(
            classify(&GatewayError::Unregistered),
            DeliveryOutcome::InvalidToken
        );
        assert_eq!(
            classify(&GatewayError::InvalidArgument("bad token".into())),
            DeliveryOutcome::InvalidToken
        );
    }

    #[test]
    fn test_transient_failures_classify_as_retryable() {
        assert_eq!(
            classify(&GatewayError::Unavailable { status: 503 }),
            DeliveryOutcome::Retryable
        );
        assert_eq!(classify(&GatewayError::Timeout), DeliveryOutcome::Retryable);
        assert_eq!(
            classify(&GatewayError::Connect("refused".into())),
            DeliveryOutcome::Retryable
        );
        assert_eq!(
            classify(&GatewayError::Transport("tls".into())),
            DeliveryOutcome::Retryable
        );
    }

    #[test]
    fn test_quota_classifies_as_rate_limited() {
        assert_eq!(
            classify(&GatewayError::QuotaExceeded { retry_after: None }),
            DeliveryOutcome::RateLimited
        );
        assert_eq!(
            classify(&GatewayError::QuotaExceeded {
                retry_after: Some(Duration::from_secs(30))
            }),
            DeliveryOutcome::RateLimited
        );
    }

    #[test]
    fn test_credential_rejection_classifies_as_auth_error() {
        assert_eq!(
            classify(&GatewayError::Unauthenticated { status: 401 }),
            DeliveryOutcome::AuthError
        );
        assert_eq!(
            classify(&GatewayError::Unauthenticated { status: 403 }),
            DeliveryOutcome::AuthError
        );
    }

    #[test]
    fn test_unexpected_response_classifies_as_unknown() {
        assert_eq!(
            classify(&GatewayError::Unexpected {
                status: 302,
                body: "moved".into()
            }),
            DeliveryOutcome::Unknown
        );
    }
}
