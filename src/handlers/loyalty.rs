use axum::{
    extract::{Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    auth::CurrentUser, entities::loyalty_history::Model as LoyaltyHistoryModel,
    errors::ServiceError, AppState,
};

const DEFAULT_HISTORY_LIMIT: u64 = 50;
const MAX_HISTORY_LIMIT: u64 = 200;

#[derive(Debug, Serialize, ToSchema)]
pub struct BalanceResponse {
    pub balance: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LoyaltyEntryResponse {
    pub id: Uuid,
    pub points_delta: i32,
    pub reason: String,
    pub order_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl From<LoyaltyHistoryModel> for LoyaltyEntryResponse {
    fn from(model: LoyaltyHistoryModel) -> Self {
        Self {
            id: model.id,
            points_delta: model.points_delta,
            reason: model.reason,
            order_id: model.order_id,
            created_at: model.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<u64>,
}

/// Current points balance for the caller
#[utoipa::path(
    get,
    path = "/api/v1/loyalty/balance",
    responses(
        (status = 200, description = "Current balance", body = BalanceResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "loyalty"
)]
pub async fn get_balance(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<BalanceResponse>, ServiceError> {
    let balance = state.services.loyalty.get_balance(user.id).await?;
    Ok(Json(BalanceResponse { balance }))
}

/// Recent ledger entries for the caller, newest first
#[utoipa::path(
    get,
    path = "/api/v1/loyalty/history",
    params(("limit" = Option<u64>, Query, description = "Max entries to return")),
    responses(
        (status = 200, description = "Ledger entries", body = [LoyaltyEntryResponse])
    ),
    security(("bearer_auth" = [])),
    tag = "loyalty"
)]
pub async fn get_history(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<LoyaltyEntryResponse>>, ServiceError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .min(MAX_HISTORY_LIMIT);

    let entries = state.services.loyalty.get_history(user.id, limit).await?;
    Ok(Json(entries.into_iter().map(Into::into).collect()))
}
