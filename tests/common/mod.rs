//! Shared fixtures for integration tests: an in-memory database with the
//! full schema applied, seed helpers, and fake provider implementations.

// Each test binary uses its own subset of these helpers.
#![allow(dead_code)]

use async_trait::async_trait;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Database, Set};
use sea_orm_migration::MigratorTrait;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use bakehouse_api::auth::{
    AuthError, IdentityClaims, IdentityProfile, IdentityProvider, ROLE_CUSTOMER,
};
use bakehouse_api::config::PricingConfig;
use bakehouse_api::db::DbPool;
use bakehouse_api::entities::{product, user};
use bakehouse_api::errors::ServiceError;
use bakehouse_api::migrator::Migrator;
use bakehouse_api::payments::{CheckoutSession, CreateSessionRequest, PaymentProvider};
use bakehouse_api::services::loyalty::LoyaltyService;
use bakehouse_api::services::orders::OrderService;
use bakehouse_api::services::products::ProductService;
use bakehouse_api::services::reconciliation::ReconciliationService;

pub async fn setup_db() -> Arc<DbPool> {
    let db = Database::connect("sqlite::memory:")
        .await
        .expect("failed to open in-memory database");
    Migrator::up(&db, None)
        .await
        .expect("failed to apply migrations");
    Arc::new(db)
}

pub async fn seed_user(db: &DbPool, external_id: &str, role: &str) -> user::Model {
    user::ActiveModel {
        id: Set(Uuid::new_v4()),
        external_id: Set(external_id.to_string()),
        email: Set(format!("{}@example.com", external_id)),
        role: Set(role.to_string()),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("failed to seed user")
}

pub async fn seed_customer(db: &DbPool) -> user::Model {
    seed_user(db, &format!("idp_{}", Uuid::new_v4().simple()), ROLE_CUSTOMER).await
}

pub async fn seed_product(db: &DbPool, name: &str, price: Decimal, stock: i32) -> product::Model {
    product::ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set(name.to_string()),
        description: Set(None),
        price: Set(price),
        category: Set("bread".to_string()),
        image_url: Set(None),
        stock: Set(stock),
        is_active: Set(true),
        pack_size: Set(None),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("failed to seed product")
}

pub fn order_service(db: Arc<DbPool>) -> OrderService {
    OrderService::new(
        db.clone(),
        PricingConfig::default(),
        LoyaltyService::new(db),
        None,
    )
}

pub fn reconciliation_service(db: Arc<DbPool>) -> ReconciliationService {
    ReconciliationService::new(
        order_service(db.clone()),
        ProductService::new(db.clone()),
        LoyaltyService::new(db),
        PricingConfig::default(),
        None,
    )
}

/// Identity provider stub: verification succeeds for any token matching a
/// configured subject, and profile fetches return the configured profile.
pub struct FakeIdentityProvider {
    pub subject: String,
    pub email: Option<String>,
    pub role: Option<String>,
    pub profile_email: Option<String>,
}

impl FakeIdentityProvider {
    pub fn new(subject: &str) -> Self {
        Self {
            subject: subject.to_string(),
            email: None,
            role: None,
            profile_email: None,
        }
    }
}

#[async_trait]
impl IdentityProvider for FakeIdentityProvider {
    async fn verify(&self, credential: &str) -> Result<IdentityClaims, AuthError> {
        if credential == "valid-token" {
            Ok(IdentityClaims {
                sub: self.subject.clone(),
                email: self.email.clone(),
                role: self.role.clone(),
                exp: chrono::Utc::now().timestamp() + 3600,
            })
        } else {
            Err(AuthError::InvalidCredential("unknown token".to_string()))
        }
    }

    async fn fetch_profile(&self, subject_id: &str) -> Result<Option<IdentityProfile>, AuthError> {
        if subject_id == self.subject {
            Ok(self.profile_email.clone().map(|email| IdentityProfile {
                email: Some(email),
            }))
        } else {
            Ok(None)
        }
    }
}

/// Payment provider stub that records every session request it receives
pub struct RecordingPaymentProvider {
    pub requests: Mutex<Vec<(CreateSessionRequest, String)>>,
    pub fail: bool,
}

impl RecordingPaymentProvider {
    pub fn new() -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            fail: true,
        }
    }
}

#[async_trait]
impl PaymentProvider for RecordingPaymentProvider {
    async fn create_session(
        &self,
        request: CreateSessionRequest,
        idempotency_key: &str,
    ) -> Result<CheckoutSession, ServiceError> {
        if self.fail {
            return Err(ServiceError::ExternalServiceError(
                "provider unavailable".to_string(),
            ));
        }

        self.requests
            .lock()
            .unwrap()
            .push((request, idempotency_key.to_string()));

        Ok(CheckoutSession {
            id: "cs_test_session".to_string(),
            url: "https://pay.example.com/cs_test_session".to_string(),
        })
    }
}
