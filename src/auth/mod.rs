//! Session verification and local user synchronization.
//!
//! Identity is owned by an external provider; this module verifies the
//! bearer credential it issues, then reconciles the verified claims with
//! the local user record. Verification (`IdentityProvider::verify`) and
//! synchronization (`SessionGate::sync_local_user`) are deliberately
//! separate steps so each can be tested in isolation.
//!
//! Role policy: the local store is authoritative. A user granted `admin`
//! locally keeps it no matter what the provider claims; the provider can
//! only promote a non-admin's role value during sync.

use async_trait::async_trait;
use axum::{
    extract::{Request, State},
    http::{header, request::Parts, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::entities::user::{self, Entity as UserEntity};
use crate::errors::ServiceError;

pub const ROLE_CUSTOMER: &str = "customer";
pub const ROLE_ADMIN: &str = "admin";

/// Domain for synthesized placeholder emails, used when neither the
/// credential nor the provider profile yields a usable address.
const PLACEHOLDER_EMAIL_DOMAIN: &str = "temp.invalid";

/// Verified claims extracted from a provider-issued session token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityClaims {
    /// Provider-side subject identifier
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    pub exp: i64,
}

/// Profile data fetched out-of-band from the provider's management API
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityProfile {
    pub email: Option<String>,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing credential")]
    MissingCredential,

    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    #[error("Identity provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Insufficient role")]
    InsufficientRole,

    #[error("Internal auth error: {0}")]
    Internal(String),
}

impl From<sea_orm::DbErr> for AuthError {
    fn from(err: sea_orm::DbErr) -> Self {
        AuthError::Internal(err.to_string())
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AuthError::MissingCredential => {
                (StatusCode::UNAUTHORIZED, "Missing credential".to_string())
            }
            AuthError::InvalidCredential(msg) => {
                (StatusCode::UNAUTHORIZED, format!("Invalid credential: {}", msg))
            }
            AuthError::ProviderUnavailable(_) => (
                StatusCode::BAD_GATEWAY,
                "Identity provider unavailable".to_string(),
            ),
            AuthError::InsufficientRole => {
                (StatusCode::FORBIDDEN, "Insufficient role".to_string())
            }
            AuthError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        let body = Json(serde_json::json!({
            "error": status.canonical_reason().unwrap_or("Error"),
            "message": message,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }));

        (status, body).into_response()
    }
}

/// External identity provider contract: credential verification plus
/// out-of-band profile lookup.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Verifies a bearer credential and returns the claims it carries
    async fn verify(&self, credential: &str) -> Result<IdentityClaims, AuthError>;

    /// Fetches profile data for a subject, if the provider exposes it.
    /// Returns `Ok(None)` when no profile is available.
    async fn fetch_profile(&self, subject_id: &str) -> Result<Option<IdentityProfile>, AuthError>;
}

/// JWT-based identity provider client. Tokens are verified locally against
/// the provider's shared secret; profile fetches go over HTTP with a
/// bounded timeout.
pub struct JwtIdentityProvider {
    decoding_key: DecodingKey,
    validation: Validation,
    http: reqwest::Client,
    api_url: Option<String>,
    api_key: Option<String>,
}

impl JwtIdentityProvider {
    pub fn new(
        secret: &str,
        issuer: Option<String>,
        api_url: Option<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        if let Some(iss) = &issuer {
            validation.set_issuer(&[iss]);
        }

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::Internal(format!("failed to build http client: {}", e)))?;

        Ok(Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            http,
            api_url,
            api_key,
        })
    }
}

#[async_trait]
impl IdentityProvider for JwtIdentityProvider {
    async fn verify(&self, credential: &str) -> Result<IdentityClaims, AuthError> {
        if credential.trim().is_empty() {
            return Err(AuthError::MissingCredential);
        }

        let data = decode::<IdentityClaims>(credential, &self.decoding_key, &self.validation)
            .map_err(|e| AuthError::InvalidCredential(e.to_string()))?;

        if data.claims.sub.trim().is_empty() {
            return Err(AuthError::InvalidCredential(
                "token subject is empty".to_string(),
            ));
        }

        Ok(data.claims)
    }

    async fn fetch_profile(&self, subject_id: &str) -> Result<Option<IdentityProfile>, AuthError> {
        let Some(base) = &self.api_url else {
            return Ok(None);
        };

        let url = format!("{}/v1/users/{}", base.trim_end_matches('/'), subject_id);
        let mut request = self.http.get(&url);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AuthError::ProviderUnavailable(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if !response.status().is_success() {
            return Err(AuthError::ProviderUnavailable(format!(
                "profile fetch returned {}",
                response.status()
            )));
        }

        let profile = response
            .json::<IdentityProfile>()
            .await
            .map_err(|e| AuthError::ProviderUnavailable(e.to_string()))?;

        Ok(Some(profile))
    }
}

/// Authenticated user attached to each request after the session gate runs
#[derive(Debug, Clone, Serialize)]
pub struct CurrentUser {
    pub id: Uuid,
    pub external_id: String,
    pub email: String,
    pub role: String,
}

impl CurrentUser {
    pub fn is_admin(&self) -> bool {
        self.role == ROLE_ADMIN
    }
}

impl From<user::Model> for CurrentUser {
    fn from(model: user::Model) -> Self {
        Self {
            id: model.id,
            external_id: model.external_id,
            email: model.email,
            role: model.role,
        }
    }
}

pub fn placeholder_email(external_id: &str) -> String {
    let prefix: String = external_id.chars().take(8).collect();
    format!("user_{}@{}", prefix, PLACEHOLDER_EMAIL_DOMAIN)
}

pub fn is_placeholder_email(email: &str) -> bool {
    email.ends_with(&format!("@{}", PLACEHOLDER_EMAIL_DOMAIN))
}

fn normalize_role(claimed: Option<&str>) -> &'static str {
    match claimed {
        Some(ROLE_ADMIN) => ROLE_ADMIN,
        _ => ROLE_CUSTOMER,
    }
}

/// Wraps every inbound request: resolves identity via the provider, then
/// reconciles the local user record.
#[derive(Clone)]
pub struct SessionGate {
    db: Arc<DatabaseConnection>,
    provider: Arc<dyn IdentityProvider>,
}

impl SessionGate {
    pub fn new(db: Arc<DatabaseConnection>, provider: Arc<dyn IdentityProvider>) -> Self {
        Self { db, provider }
    }

    /// Verifies the credential and returns the synced local user.
    #[instrument(skip(self, credential))]
    pub async fn validate_session(&self, credential: &str) -> Result<CurrentUser, AuthError> {
        let claims = self.provider.verify(credential).await?;
        let model = self
            .sync_local_user(&claims.sub, claims.email.as_deref(), claims.role.as_deref())
            .await?;
        Ok(model.into())
    }

    /// Idempotent upsert of the local user record from verified provider
    /// data. Also used by the provider's user-lifecycle webhook.
    #[instrument(skip(self, email, claimed_role), fields(external_id = %external_id))]
    pub async fn sync_local_user(
        &self,
        external_id: &str,
        email: Option<&str>,
        claimed_role: Option<&str>,
    ) -> Result<user::Model, AuthError> {
        let db = &*self.db;
        let claimed_role = normalize_role(claimed_role);
        let claimed_email = email
            .map(str::trim)
            .filter(|e| !e.is_empty() && !is_placeholder_email(e))
            .map(str::to_string);

        let existing = UserEntity::find()
            .filter(user::Column::ExternalId.eq(external_id))
            .one(db)
            .await?;

        match existing {
            None => {
                // Lazy creation on first verified session. Fall back to a
                // provider profile fetch for OAuth signups whose tokens
                // carry no email, and to a placeholder as last resort.
                let email = match claimed_email {
                    Some(e) => e,
                    None => match self.provider.fetch_profile(external_id).await {
                        Ok(Some(profile)) => profile
                            .email
                            .filter(|e| !e.trim().is_empty())
                            .unwrap_or_else(|| placeholder_email(external_id)),
                        Ok(None) => placeholder_email(external_id),
                        Err(e) => {
                            warn!(error = %e, "Profile fetch failed; creating user with placeholder email");
                            placeholder_email(external_id)
                        }
                    },
                };

                let model = user::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    external_id: Set(external_id.to_string()),
                    email: Set(email.clone()),
                    role: Set(claimed_role.to_string()),
                    ..Default::default()
                }
                .insert(db)
                .await?;

                info!(user_id = %model.id, role = %claimed_role, "User created on first verified session");
                Ok(model)
            }
            Some(stored) => {
                // Stored admin role is sticky; provider sync can only
                // promote, never demote.
                let final_role = if stored.role == ROLE_ADMIN {
                    ROLE_ADMIN.to_string()
                } else {
                    claimed_role.to_string()
                };

                // Refresh email from the claims, or via profile fetch when
                // the stored address is still a placeholder. Never replace
                // a real address with a placeholder or empty value.
                let mut final_email = claimed_email;
                if final_email.is_none() && is_placeholder_email(&stored.email) {
                    match self.provider.fetch_profile(external_id).await {
                        Ok(Some(profile)) => {
                            final_email = profile.email.filter(|e| !e.trim().is_empty());
                        }
                        Ok(None) => {}
                        Err(e) => {
                            debug!(error = %e, "Profile fetch failed during email refresh");
                        }
                    }
                }
                let final_email = final_email.unwrap_or_else(|| stored.email.clone());

                if stored.role != final_role || stored.email != final_email {
                    let was_placeholder = is_placeholder_email(&stored.email);
                    let mut active: user::ActiveModel = stored.into();
                    active.role = Set(final_role);
                    active.email = Set(final_email.clone());
                    let updated = active.update(db).await?;

                    if was_placeholder && !is_placeholder_email(&final_email) {
                        info!(user_id = %updated.id, "Replaced placeholder email with verified address");
                    }
                    Ok(updated)
                } else {
                    Ok(stored)
                }
            }
        }
    }
}

/// Authentication middleware: validates the bearer credential and attaches
/// the resulting `CurrentUser` to request extensions.
pub async fn session_middleware(
    State(state): State<crate::AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = match bearer_token(request.headers()) {
        Some(token) => token,
        None => return AuthError::MissingCredential.into_response(),
    };

    match state.session_gate.validate_session(&token).await {
        Ok(user) => {
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        Err(e) => e.into_response(),
    }
}

fn bearer_token(headers: &axum::http::HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

#[async_trait]
impl<S> axum::extract::FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or(AuthError::MissingCredential)
    }
}

/// Role check applied by each privileged operation
pub fn require_admin(user: &CurrentUser) -> Result<(), ServiceError> {
    if user.is_admin() {
        Ok(())
    } else {
        Err(ServiceError::Forbidden(
            "Admin role required".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_email_roundtrip() {
        let email = placeholder_email("idp_8f3a2c91d4");
        assert_eq!(email, "user_idp_8f3a@temp.invalid");
        assert!(is_placeholder_email(&email));
        assert!(!is_placeholder_email("alice@example.com"));
    }

    #[test]
    fn test_normalize_role_defaults_to_customer() {
        assert_eq!(normalize_role(Some("admin")), ROLE_ADMIN);
        assert_eq!(normalize_role(Some("customer")), ROLE_CUSTOMER);
        assert_eq!(normalize_role(Some("superuser")), ROLE_CUSTOMER);
        assert_eq!(normalize_role(None), ROLE_CUSTOMER);
    }

    #[test]
    fn test_bearer_token_extraction() {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Bearer abc.def.ghi".parse().unwrap());
        assert_eq!(bearer_token(&headers).as_deref(), Some("abc.def.ghi"));

        headers.insert(header::AUTHORIZATION, "Basic dXNlcg==".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, "Bearer ".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);
    }
}
