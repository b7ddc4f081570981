use axum::{extract::State, Json};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::CurrentUser, errors::ServiceError, services::checkout::CheckoutResponse, AppState,
};

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct StartCheckoutRequest {
    pub order_id: Uuid,
}

/// Start a hosted checkout session for an order awaiting payment
#[utoipa::path(
    post,
    path = "/api/v1/checkout",
    request_body = StartCheckoutRequest,
    responses(
        (status = 200, description = "Checkout session created", body = CheckoutResponse),
        (status = 402, description = "Payment provider rejected the session"),
        (status = 403, description = "Order belongs to another user"),
        (status = 404, description = "Order not found"),
        (status = 409, description = "Order is not awaiting payment")
    ),
    security(("bearer_auth" = [])),
    tag = "checkout"
)]
pub async fn start_checkout(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(request): Json<StartCheckoutRequest>,
) -> Result<Json<CheckoutResponse>, ServiceError> {
    let response = state
        .services
        .checkout
        .start_checkout(request.order_id, &user)
        .await?;
    Ok(Json(response))
}
