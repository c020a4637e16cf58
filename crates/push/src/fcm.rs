//! FCM v1-style HTTP push client.
//!
//! Sends one notification per call to `{base_url}/v1/projects/{project}/messages:send`
//! with a bearer credential, and maps the gateway's HTTP status onto
//! [`GatewayError`] variants. Credential provisioning and rotation happen
//! outside this crate; the client is handed a ready-to-use token.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use crate::gateway::{GatewayError, PushGateway};

/// Per-request timeout. Deliveries that outlive this count as `Timeout`
/// and are retried by the dispatch engine.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Push gateway endpoint configuration.
#[derive(Debug, Clone)]
pub struct FcmConfig {
    /// Gateway base URL, e.g. `https://fcm.googleapis.com`.
    pub base_url: String,
    /// Project identifier used in the send endpoint path.
    pub project_id: String,
    /// Bearer credential presented on every request.
    pub auth_token: String,
}

/// Outbound message payload.
#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    message: Message<'a>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    token: &'a str,
    notification: Notification<'a>,
    data: &'a HashMap<String, String>,
}

#[derive(Debug, Serialize)]
struct Notification<'a> {
    title: &'a str,
    body: &'a str,
}

/// Success response; `name` is the gateway-assigned message id.
#[derive(Debug, Deserialize)]
struct SendResponse {
    name: String,
}

/// Error response body.
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
    status: String,
}

/// HTTP client for the push gateway.
pub struct FcmClient {
    http_client: Client,
    config: FcmConfig,
}

impl FcmClient {
    pub fn new(config: FcmConfig) -> Result<Self, GatewayError> {
        let http_client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http_client,
            config,
        })
    }

    fn send_url(&self) -> String {
        format!(
            "{}/v1/projects/{}/messages:send",
            self.config.base_url.trim_end_matches('/'),
            self.config.project_id
        )
    }
}

#[async_trait::async_trait]
impl PushGateway for FcmClient {
    async fn send(
        &self,
        token: &str,
        title: &str,
        body: &str,
        data: &HashMap<String, String>,
    ) -> Result<String, GatewayError> {
        let request = SendRequest {
            message: Message {
                token,
                notification: Notification { title, body },
                data,
            },
        };

        let response = self
            .http_client
            .post(self.send_url())
            .header(
                "authorization",
                format!("Bearer {}", self.config.auth_token),
            )
            .json(&request)
            .send()
            .await?;

        let status = response.status().as_u16();
        match status {
            200 => {
                let parsed: SendResponse = response.json().await?;
                trace!(message_id = %parsed.name, "push notification accepted");
                Ok(parsed.name)
            }
            400 => {
                let detail = error_detail(response).await;
                Err(GatewayError::InvalidArgument(detail))
            }
            404 => Err(GatewayError::Unregistered),
            401 | 403 => Err(GatewayError::Unauthenticated { status }),
            429 => {
                let retry_after = parse_retry_after(
                    response
                        .headers()
                        .get("retry-after")
                        .and_then(|v| v.to_str().ok()),
                );
                Err(GatewayError::QuotaExceeded { retry_after })
            }
            500..=599 => Err(GatewayError::Unavailable { status }),
            _ => {
                let body = response.text().await.unwrap_or_default();
                warn!(status, body = %body, "unexpected push gateway response");
                Err(GatewayError::Unexpected { status, body })
            }
        }
    }
}

/// Extract a human-readable detail string from an error response body.
async fn error_detail(response: reqwest::Response) -> String {
    match response.json::<ErrorResponse>().await {
        Ok(parsed) => format!("{}: {}", parsed.error.status, parsed.error.message),
        Err(_) => "unparseable error body".to_string(),
    }
}

/// Parse a Retry-After header value into a Duration.
///
/// Only the delay-seconds form is supported; HTTP-date values yield None.
fn parse_retry_after(header_value: Option<&str>) -> Option<Duration> {
    let seconds: u64 = header_value?.parse().ok()?;
    Some(Duration::from_secs(seconds))
}
