//! Payment-provider webhook endpoint. Verifies the HMAC signature over the
//! raw body before any parsing, then hands the event to reconciliation.
//!
//! Signature header format: `t=<unix_ts>,v1=<hex hmac>`, where the MAC is
//! HMAC-SHA256 over `"{t}.{raw_body}"`. Multiple `v1` entries may appear
//! during secret rotation; any valid one passes.

use axum::{extract::State, http::HeaderMap, Json};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::{error, instrument, warn};

use crate::{errors::ServiceError, payments::WebhookEvent, AppState};

const SIGNATURE_HEADER: &str = "stripe-signature";

type HmacSha256 = Hmac<Sha256>;

/// Receive a payment-provider event
#[utoipa::path(
    post,
    path = "/api/v1/webhooks/payments",
    responses(
        (status = 200, description = "Event accepted"),
        (status = 400, description = "Malformed payload or signature header"),
        (status = 401, description = "Signature verification failed")
    ),
    tag = "webhooks"
)]
#[instrument(skip(state, headers, body))]
pub async fn handle_payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<serde_json::Value>, ServiceError> {
    match &state.config.payment_webhook_secret {
        Some(secret) => {
            let header = headers
                .get(SIGNATURE_HEADER)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| {
                    ServiceError::Unauthorized("Missing webhook signature".to_string())
                })?;

            verify_signature(
                secret,
                header,
                body.as_bytes(),
                state.config.payment_webhook_tolerance_secs,
            )?;
        }
        None => {
            // Tolerated for local development only; production configs
            // must set the webhook secret.
            warn!("Payment webhook secret not configured; accepting event unverified");
        }
    }

    let event: WebhookEvent = serde_json::from_str(&body).map_err(|e| {
        error!(error = %e, "Failed to parse webhook payload");
        ServiceError::BadRequest(format!("Invalid webhook payload: {}", e))
    })?;

    state.services.reconciliation.handle_event(event).await?;

    Ok(Json(serde_json::json!({ "received": true })))
}

/// Verifies `t=`/`v1=` signature headers against the raw payload.
fn verify_signature(
    secret: &str,
    header: &str,
    payload: &[u8],
    tolerance_secs: u64,
) -> Result<(), ServiceError> {
    let mut timestamp: Option<i64> = None;
    let mut signatures: Vec<Vec<u8>> = Vec::new();

    for part in header.split(',') {
        let mut kv = part.trim().splitn(2, '=');
        match (kv.next(), kv.next()) {
            (Some("t"), Some(value)) => {
                timestamp = value.parse::<i64>().ok();
            }
            (Some("v1"), Some(value)) => {
                if let Ok(sig) = hex::decode(value) {
                    signatures.push(sig);
                }
            }
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or_else(|| {
        ServiceError::BadRequest("Signature header missing timestamp".to_string())
    })?;
    if signatures.is_empty() {
        return Err(ServiceError::BadRequest(
            "Signature header carries no v1 signature".to_string(),
        ));
    }

    let now = chrono::Utc::now().timestamp();
    if (now - timestamp).unsigned_abs() > tolerance_secs {
        return Err(ServiceError::Unauthorized(
            "Webhook timestamp outside tolerance".to_string(),
        ));
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ServiceError::InternalError(format!("invalid webhook secret: {}", e)))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);

    // Mac::verify_slice is constant-time
    let verified = signatures
        .iter()
        .any(|sig| mac.clone().verify_slice(sig).is_ok());

    if verified {
        Ok(())
    } else {
        Err(ServiceError::Unauthorized(
            "Webhook signature mismatch".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, timestamp: i64, payload: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn test_valid_signature_passes() {
        let secret = "whsec_test_secret";
        let payload = br#"{"type":"checkout.session.completed"}"#;
        let ts = chrono::Utc::now().timestamp();
        let header = format!("t={},v1={}", ts, sign(secret, ts, payload));

        assert!(verify_signature(secret, &header, payload, 300).is_ok());
    }

    #[test]
    fn test_tampered_payload_fails() {
        let secret = "whsec_test_secret";
        let payload = br#"{"type":"checkout.session.completed"}"#;
        let ts = chrono::Utc::now().timestamp();
        let header = format!("t={},v1={}", ts, sign(secret, ts, payload));

        let result = verify_signature(secret, &header, b"{\"type\":\"evil\"}", 300);
        assert!(matches!(result, Err(ServiceError::Unauthorized(_))));
    }

    #[test]
    fn test_stale_timestamp_fails() {
        let secret = "whsec_test_secret";
        let payload = b"{}";
        let ts = chrono::Utc::now().timestamp() - 3600;
        let header = format!("t={},v1={}", ts, sign(secret, ts, payload));

        let result = verify_signature(secret, &header, payload, 300);
        assert!(matches!(result, Err(ServiceError::Unauthorized(_))));
    }

    #[test]
    fn test_rotated_secret_second_signature_passes() {
        let secret = "whsec_new";
        let payload = b"{}";
        let ts = chrono::Utc::now().timestamp();
        let header = format!(
            "t={},v1={},v1={}",
            ts,
            sign("whsec_old", ts, payload),
            sign(secret, ts, payload)
        );

        assert!(verify_signature(secret, &header, payload, 300).is_ok());
    }

    #[test]
    fn test_missing_timestamp_is_bad_request() {
        let result = verify_signature("s", "v1=deadbeef", b"{}", 300);
        assert!(matches!(result, Err(ServiceError::BadRequest(_))));
    }
}
