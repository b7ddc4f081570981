//! OpenAPI document for the HTTP surface, served at
//! `/api-docs/openapi.json`.

use axum::Json;
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};

use crate::{errors, handlers, services};

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health_check,
        handlers::orders::create_order,
        handlers::orders::list_orders,
        handlers::orders::get_order,
        handlers::orders::list_all_orders,
        handlers::orders::update_order_status,
        handlers::checkout::start_checkout,
        handlers::payment_webhooks::handle_payment_webhook,
        handlers::identity_webhooks::handle_identity_webhook,
        handlers::loyalty::get_balance,
        handlers::loyalty::get_history,
        handlers::products::list_products,
        handlers::products::get_product,
        handlers::products::list_all_products,
        handlers::products::create_product,
        handlers::products::update_product,
        handlers::users::get_me,
        handlers::users::list_users,
        handlers::users::update_user_role,
    ),
    components(schemas(
        errors::ErrorResponse,
        handlers::HealthResponse,
        handlers::checkout::StartCheckoutRequest,
        handlers::loyalty::BalanceResponse,
        handlers::loyalty::LoyaltyEntryResponse,
        handlers::products::ProductResponse,
        handlers::users::UserResponse,
        handlers::users::UpdateUserRoleRequest,
        services::checkout::CheckoutResponse,
        services::orders::CreateOrderRequest,
        services::orders::OrderItemRequest,
        services::orders::UpdateOrderStatusRequest,
        services::orders::OrderResponse,
        services::orders::OrderItemResponse,
        services::products::CreateProductRequest,
        services::products::UpdateProductRequest,
    )),
    modifiers(&SecurityAddon),
    tags(
        (name = "orders", description = "Order creation and tracking"),
        (name = "checkout", description = "Hosted payment checkout"),
        (name = "loyalty", description = "Loyalty points ledger"),
        (name = "products", description = "Storefront catalog"),
        (name = "users", description = "User profile"),
        (name = "admin", description = "Privileged shop management"),
        (name = "webhooks", description = "Inbound provider events"),
        (name = "health", description = "Service health"),
    ),
    info(
        title = "Bakehouse API",
        description = "Order, payment reconciliation, and loyalty backend for an online bakery"
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

pub async fn serve_openapi() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
