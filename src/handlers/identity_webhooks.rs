//! Identity-provider user-lifecycle webhook. Signed in the svix style:
//! HMAC-SHA256 over `"{id}.{timestamp}.{raw_body}"` with a base64 key,
//! delivered as one or more `v1,<base64 mac>` entries in the signature
//! header.

use axum::{extract::State, http::HeaderMap, Json};
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use tracing::{error, info, instrument, warn};

use crate::{errors::ServiceError, events::Event, AppState};

const ID_HEADER: &str = "webhook-id";
const TIMESTAMP_HEADER: &str = "webhook-timestamp";
const SIGNATURE_HEADER: &str = "webhook-signature";

const EVENT_USER_CREATED: &str = "user.created";
const EVENT_USER_UPDATED: &str = "user.updated";

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Deserialize)]
struct IdentityWebhookEvent {
    #[serde(rename = "type")]
    event_type: String,
    data: IdentityWebhookUser,
}

#[derive(Debug, Deserialize)]
struct IdentityWebhookUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    role: Option<String>,
}

/// Receive an identity-provider user-lifecycle event
#[utoipa::path(
    post,
    path = "/api/v1/webhooks/identity",
    responses(
        (status = 200, description = "Event accepted"),
        (status = 400, description = "Malformed payload or headers"),
        (status = 401, description = "Signature verification failed")
    ),
    tag = "webhooks"
)]
#[instrument(skip(state, headers, body))]
pub async fn handle_identity_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<serde_json::Value>, ServiceError> {
    match &state.config.identity_webhook_secret {
        Some(secret) => verify_signature(secret, &headers, body.as_bytes())?,
        None => {
            warn!("Identity webhook secret not configured; accepting event unverified");
        }
    }

    let event: IdentityWebhookEvent = serde_json::from_str(&body).map_err(|e| {
        error!(error = %e, "Failed to parse identity webhook payload");
        ServiceError::BadRequest(format!("Invalid webhook payload: {}", e))
    })?;

    match event.event_type.as_str() {
        EVENT_USER_CREATED | EVENT_USER_UPDATED => {
            let model = state
                .session_gate
                .sync_local_user(
                    &event.data.id,
                    event.data.email.as_deref(),
                    event.data.role.as_deref(),
                )
                .await
                .map_err(|e| ServiceError::InternalError(e.to_string()))?;

            info!(user_id = %model.id, event_type = %event.event_type, "Synced user from identity webhook");

            if let Some(sender) = &state.event_sender {
                let _ = sender.send(Event::UserSynced(model.id)).await;
            }
        }
        other => {
            info!(event_type = %other, "Ignoring unhandled identity event type");
        }
    }

    Ok(Json(serde_json::json!({ "received": true })))
}

fn verify_signature(
    secret: &str,
    headers: &HeaderMap,
    payload: &[u8],
) -> Result<(), ServiceError> {
    let msg_id = header_str(headers, ID_HEADER)?;
    let timestamp = header_str(headers, TIMESTAMP_HEADER)?;
    let signature_header = header_str(headers, SIGNATURE_HEADER)?;

    // Keys are distributed base64-encoded with an optional scheme prefix
    let raw_key = secret.strip_prefix("whsec_").unwrap_or(secret);
    let key = base64::engine::general_purpose::STANDARD
        .decode(raw_key)
        .unwrap_or_else(|_| raw_key.as_bytes().to_vec());

    let mut mac = HmacSha256::new_from_slice(&key)
        .map_err(|e| ServiceError::InternalError(format!("invalid webhook secret: {}", e)))?;
    mac.update(msg_id.as_bytes());
    mac.update(b".");
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);

    let verified = signature_header
        .split_whitespace()
        .filter_map(|entry| entry.strip_prefix("v1,"))
        .filter_map(|encoded| {
            base64::engine::general_purpose::STANDARD.decode(encoded).ok()
        })
        .any(|sig| mac.clone().verify_slice(&sig).is_ok());

    if verified {
        Ok(())
    } else {
        Err(ServiceError::Unauthorized(
            "Webhook signature mismatch".to_string(),
        ))
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, ServiceError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ServiceError::BadRequest(format!("Missing {} header", name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signed_headers(secret: &str, msg_id: &str, timestamp: &str, payload: &[u8]) -> HeaderMap {
        let raw_key = secret.strip_prefix("whsec_").unwrap_or(secret);
        let key = base64::engine::general_purpose::STANDARD
            .decode(raw_key)
            .unwrap_or_else(|_| raw_key.as_bytes().to_vec());

        let mut mac = HmacSha256::new_from_slice(&key).unwrap();
        mac.update(msg_id.as_bytes());
        mac.update(b".");
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(payload);
        let sig = base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes());

        let mut headers = HeaderMap::new();
        headers.insert(ID_HEADER, msg_id.parse().unwrap());
        headers.insert(TIMESTAMP_HEADER, timestamp.parse().unwrap());
        headers.insert(SIGNATURE_HEADER, format!("v1,{}", sig).parse().unwrap());
        headers
    }

    #[test]
    fn test_valid_signature_passes() {
        let secret = "whsec_C2FVsBQIhrscChlQIMV+b5sSYspob7oD";
        let payload = br#"{"type":"user.created","data":{"id":"idp_1"}}"#;
        let headers = signed_headers(secret, "msg_1", "1700000000", payload);

        assert!(verify_signature(secret, &headers, payload).is_ok());
    }

    #[test]
    fn test_tampered_payload_fails() {
        let secret = "whsec_C2FVsBQIhrscChlQIMV+b5sSYspob7oD";
        let payload = br#"{"type":"user.created","data":{"id":"idp_1"}}"#;
        let headers = signed_headers(secret, "msg_1", "1700000000", payload);

        let result = verify_signature(secret, &headers, b"{}");
        assert!(matches!(result, Err(ServiceError::Unauthorized(_))));
    }

    #[test]
    fn test_missing_headers_is_bad_request() {
        let result = verify_signature("whsec_abc", &HeaderMap::new(), b"{}");
        assert!(matches!(result, Err(ServiceError::BadRequest(_))));
    }
}
