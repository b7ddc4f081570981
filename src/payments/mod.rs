//! Payment provider integration: hosted checkout session creation and the
//! webhook event payloads the reconciliation handler consumes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::error;

use crate::errors::ServiceError;

/// Webhook event types emitted by the provider
pub const EVENT_SESSION_COMPLETED: &str = "checkout.session.completed";
pub const EVENT_SESSION_PAYMENT_FAILED: &str = "checkout.session.async_payment_failed";
pub const EVENT_INTENT_PAYMENT_FAILED: &str = "payment_intent.payment_failed";

/// Payment capture state reported inside a completed-session event. A
/// completed session whose payment is not captured must not be treated as
/// paid.
pub const PAYMENT_STATUS_PAID: &str = "paid";

/// One provider-side line item, in minor currency units
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutLineItem {
    pub name: String,
    pub description: Option<String>,
    /// Unit amount in minor units (pence/cents)
    pub unit_amount_minor: i64,
    pub quantity: i32,
}

/// Metadata round-tripped through the provider so webhook events can be
/// mapped back to an order even if the session id was never persisted
#[derive(Debug, Clone, Serialize)]
pub struct SessionMetadata {
    pub order_id: String,
    pub user_id: String,
    pub points_redeemed: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateSessionRequest {
    pub line_items: Vec<CheckoutLineItem>,
    pub currency: String,
    pub customer_email: Option<String>,
    pub metadata: SessionMetadata,
    pub success_url: String,
    pub cancel_url: String,
}

/// Hosted checkout session handle returned by the provider
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: String,
}

/// Payment provider contract consumed by the checkout service
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Creates a hosted checkout session. The idempotency key makes
    /// retried checkout clicks reuse the same provider session.
    async fn create_session(
        &self,
        request: CreateSessionRequest,
        idempotency_key: &str,
    ) -> Result<CheckoutSession, ServiceError>;
}

/// HTTP client for the provider's hosted-checkout API. All calls carry a
/// bounded timeout; a timeout is surfaced as a provider error, never as
/// success.
pub struct HostedCheckoutClient {
    http: reqwest::Client,
    api_url: String,
    secret_key: String,
}

impl HostedCheckoutClient {
    pub fn new(
        api_url: String,
        secret_key: String,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                ServiceError::InternalError(format!("failed to build http client: {}", e))
            })?;

        Ok(Self {
            http,
            api_url,
            secret_key,
        })
    }
}

#[async_trait]
impl PaymentProvider for HostedCheckoutClient {
    async fn create_session(
        &self,
        request: CreateSessionRequest,
        idempotency_key: &str,
    ) -> Result<CheckoutSession, ServiceError> {
        let url = format!(
            "{}/v1/checkout/sessions",
            self.api_url.trim_end_matches('/')
        );

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.secret_key)
            .header("Idempotency-Key", idempotency_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "Payment session creation request failed");
                ServiceError::ExternalServiceError(format!("payment provider: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(%status, %body, "Payment provider rejected session creation");
            return Err(ServiceError::ExternalServiceError(format!(
                "payment provider returned {}",
                status
            )));
        }

        response.json::<CheckoutSession>().await.map_err(|e| {
            ServiceError::ExternalServiceError(format!("invalid provider response: {}", e))
        })
    }
}

/// Inbound webhook event envelope
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: WebhookEventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEventData {
    pub object: PaymentObject,
}

/// The session or payment-intent object carried by a webhook event
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentObject {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub payment_status: Option<String>,
    #[serde(default)]
    pub metadata: PaymentMetadata,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaymentMetadata {
    #[serde(default, alias = "orderId")]
    pub order_id: Option<String>,
}
