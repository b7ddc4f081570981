use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{DateTime, Utc};
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::{require_admin, CurrentUser, ROLE_ADMIN, ROLE_CUSTOMER},
    entities::user::{self, Entity as UserEntity, Model as UserModel},
    errors::ServiceError,
    AppState,
};

#[derive(Debug, Serialize, ToSchema)]
pub struct UserResponse {
    pub id: Uuid,
    pub external_id: String,
    pub email: String,
    pub role: String,
    pub created_at: DateTime<Utc>,
}

impl From<UserModel> for UserResponse {
    fn from(model: UserModel) -> Self {
        Self {
            id: model.id,
            external_id: model.external_id,
            email: model.email,
            role: model.role,
            created_at: model.created_at,
        }
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpdateUserRoleRequest {
    #[validate(length(min = 1, message = "Role is required"))]
    pub role: String,
}

/// The caller's own profile
#[utoipa::path(
    get,
    path = "/api/v1/users/me",
    responses(
        (status = 200, description = "Current user", body = UserResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "users"
)]
pub async fn get_me(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<UserResponse>, ServiceError> {
    let model = UserEntity::find_by_id(user.id)
        .one(&*state.db)
        .await?
        .ok_or_else(|| ServiceError::NotFound("User not found".to_string()))?;
    Ok(Json(model.into()))
}

/// Admin: list all users
#[utoipa::path(
    get,
    path = "/api/v1/admin/users",
    responses(
        (status = 200, description = "All users", body = [UserResponse]),
        (status = 403, description = "Admin role required")
    ),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn list_users(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<Vec<UserResponse>>, ServiceError> {
    require_admin(&user)?;
    let users = UserEntity::find().all(&*state.db).await?;
    Ok(Json(users.into_iter().map(Into::into).collect()))
}

/// Admin: grant or revoke the admin role. This is the only path that can
/// demote an admin; provider sync never does.
#[utoipa::path(
    put,
    path = "/api/v1/admin/users/{id}/role",
    params(("id" = Uuid, Path, description = "User ID")),
    request_body = UpdateUserRoleRequest,
    responses(
        (status = 200, description = "Role updated", body = UserResponse),
        (status = 400, description = "Unknown role"),
        (status = 403, description = "Admin role required"),
        (status = 404, description = "User not found")
    ),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn update_user_role(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateUserRoleRequest>,
) -> Result<Json<UserResponse>, ServiceError> {
    require_admin(&user)?;
    request.validate()?;

    if request.role != ROLE_ADMIN && request.role != ROLE_CUSTOMER {
        return Err(ServiceError::ValidationError(format!(
            "Unknown role: {}",
            request.role
        )));
    }

    let target = UserEntity::find_by_id(id)
        .one(&*state.db)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("User {} not found", id)))?;

    let mut active: user::ActiveModel = target.into();
    active.role = Set(request.role.clone());
    let updated = active.update(&*state.db).await?;

    info!(user_id = %id, role = %request.role, granted_by = %user.id, "User role updated");
    Ok(Json(updated.into()))
}
