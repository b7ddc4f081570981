//! HTTP layer: request handlers grouped by resource, plus the service
//! bundle they share.

use axum::Json;
use serde::Serialize;
use std::sync::Arc;
use utoipa::ToSchema;

use crate::{
    config::AppConfig,
    db::DbPool,
    events::EventSender,
    payments::PaymentProvider,
    services::checkout::CheckoutService,
    services::loyalty::LoyaltyService,
    services::orders::OrderService,
    services::products::ProductService,
    services::reconciliation::ReconciliationService,
};

pub mod checkout;
pub mod identity_webhooks;
pub mod loyalty;
pub mod orders;
pub mod payment_webhooks;
pub mod products;
pub mod users;

/// All domain services, wired once at startup and cloned into handlers
/// through application state.
#[derive(Clone)]
pub struct AppServices {
    pub orders: OrderService,
    pub checkout: CheckoutService,
    pub reconciliation: ReconciliationService,
    pub loyalty: LoyaltyService,
    pub products: ProductService,
}

impl AppServices {
    pub fn new(
        db: Arc<DbPool>,
        config: &AppConfig,
        payment_provider: Arc<dyn PaymentProvider>,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        let pricing = config.pricing();
        let loyalty = LoyaltyService::new(db.clone());
        let products = ProductService::new(db.clone());
        let orders = OrderService::new(
            db.clone(),
            pricing,
            loyalty.clone(),
            event_sender.clone(),
        );
        let checkout = CheckoutService::new(
            db.clone(),
            payment_provider,
            orders.clone(),
            config.currency.clone(),
            config.checkout_success_url.clone(),
            config.checkout_cancel_url.clone(),
            event_sender.clone(),
        );
        let reconciliation = ReconciliationService::new(
            orders.clone(),
            products.clone(),
            loyalty.clone(),
            pricing,
            event_sender,
        );

        Self {
            orders,
            checkout,
            reconciliation,
            loyalty,
            products,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Liveness probe
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    ),
    tag = "health"
)]
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
