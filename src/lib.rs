pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod migrator;
pub mod openapi;
pub mod payments;
pub mod services;

use axum::{
    http::{HeaderValue, Method},
    middleware,
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::warn;

use crate::{
    auth::{session_middleware, SessionGate},
    config::AppConfig,
    db::DbPool,
    events::EventSender,
    handlers::AppServices,
};

/// Shared application state cloned into every handler
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DbPool>,
    pub config: Arc<AppConfig>,
    pub services: AppServices,
    pub session_gate: Arc<SessionGate>,
    pub event_sender: Option<Arc<EventSender>>,
}

/// Builds the full application router.
///
/// Webhooks, the catalog, and health stay public; everything else sits
/// behind the session gate.
pub fn app_router(state: AppState) -> Router {
    let public = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/api/v1/products", get(handlers::products::list_products))
        .route(
            "/api/v1/products/:id",
            get(handlers::products::get_product),
        )
        .route(
            "/api/v1/webhooks/payments",
            post(handlers::payment_webhooks::handle_payment_webhook),
        )
        .route(
            "/api/v1/webhooks/identity",
            post(handlers::identity_webhooks::handle_identity_webhook),
        )
        .route(
            "/api-docs/openapi.json",
            get(openapi::serve_openapi),
        );

    let protected = Router::new()
        .route(
            "/api/v1/orders",
            get(handlers::orders::list_orders).post(handlers::orders::create_order),
        )
        .route("/api/v1/orders/:id", get(handlers::orders::get_order))
        .route("/api/v1/checkout", post(handlers::checkout::start_checkout))
        .route("/api/v1/loyalty/balance", get(handlers::loyalty::get_balance))
        .route("/api/v1/loyalty/history", get(handlers::loyalty::get_history))
        .route("/api/v1/users/me", get(handlers::users::get_me))
        .route("/api/v1/admin/orders", get(handlers::orders::list_all_orders))
        .route(
            "/api/v1/admin/orders/:id/status",
            put(handlers::orders::update_order_status),
        )
        .route(
            "/api/v1/admin/products",
            get(handlers::products::list_all_products)
                .post(handlers::products::create_product),
        )
        .route(
            "/api/v1/admin/products/:id",
            put(handlers::products::update_product),
        )
        .route("/api/v1/admin/users", get(handlers::users::list_users))
        .route(
            "/api/v1/admin/users/:id/role",
            put(handlers::users::update_user_role),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            session_middleware,
        ));

    Router::new()
        .merge(public)
        .merge(protected)
        .layer(cors_layer(&state.config))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(config: &AppConfig) -> CorsLayer {
    let methods = [
        Method::GET,
        Method::POST,
        Method::PUT,
        Method::DELETE,
        Method::OPTIONS,
    ];

    match &config.cors_allowed_origins {
        Some(origins) => {
            let parsed: Vec<HeaderValue> = origins
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .filter_map(|o| match o.parse::<HeaderValue>() {
                    Ok(v) => Some(v),
                    Err(_) => {
                        warn!(origin = %o, "Ignoring unparsable CORS origin");
                        None
                    }
                })
                .collect();

            CorsLayer::new()
                .allow_origin(parsed)
                .allow_methods(methods)
                .allow_headers(tower_http::cors::Any)
        }
        None => CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods(methods)
            .allow_headers(tower_http::cors::Any),
    }
}
