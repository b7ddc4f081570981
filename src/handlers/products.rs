use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    auth::{require_admin, CurrentUser},
    entities::product::Model as ProductModel,
    errors::ServiceError,
    services::products::{CreateProductRequest, UpdateProductRequest},
    AppState,
};

#[derive(Debug, Serialize, ToSchema)]
pub struct ProductResponse {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    #[schema(value_type = f64)]
    pub price: Decimal,
    pub category: String,
    pub image_url: Option<String>,
    pub stock: i32,
    pub is_active: bool,
    pub pack_size: Option<i32>,
    pub created_at: DateTime<Utc>,
}

impl From<ProductModel> for ProductResponse {
    fn from(model: ProductModel) -> Self {
        Self {
            id: model.id,
            name: model.name,
            description: model.description,
            price: model.price,
            category: model.category,
            image_url: model.image_url,
            stock: model.stock,
            is_active: model.is_active,
            pack_size: model.pack_size,
            created_at: model.created_at,
        }
    }
}

/// Storefront catalog: active products only
#[utoipa::path(
    get,
    path = "/api/v1/products",
    responses(
        (status = 200, description = "Active products", body = [ProductResponse])
    ),
    tag = "products"
)]
pub async fn list_products(
    State(state): State<AppState>,
) -> Result<Json<Vec<ProductResponse>>, ServiceError> {
    let products = state.services.products.list_active().await?;
    Ok(Json(products.into_iter().map(Into::into).collect()))
}

/// Single product detail
#[utoipa::path(
    get,
    path = "/api/v1/products/{id}",
    params(("id" = Uuid, Path, description = "Product ID")),
    responses(
        (status = 200, description = "Product detail", body = ProductResponse),
        (status = 404, description = "Product not found")
    ),
    tag = "products"
)]
pub async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ProductResponse>, ServiceError> {
    let product = state
        .services
        .products
        .get_product(id)
        .await?
        .filter(|p| p.is_active)
        .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", id)))?;
    Ok(Json(product.into()))
}

/// Admin: full catalog, inactive products included
#[utoipa::path(
    get,
    path = "/api/v1/admin/products",
    responses(
        (status = 200, description = "All products", body = [ProductResponse]),
        (status = 403, description = "Admin role required")
    ),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn list_all_products(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<Vec<ProductResponse>>, ServiceError> {
    require_admin(&user)?;
    let products = state.services.products.list_all().await?;
    Ok(Json(products.into_iter().map(Into::into).collect()))
}

/// Admin: add a product to the catalog
#[utoipa::path(
    post,
    path = "/api/v1/admin/products",
    request_body = CreateProductRequest,
    responses(
        (status = 201, description = "Product created", body = ProductResponse),
        (status = 400, description = "Invalid product payload"),
        (status = 403, description = "Admin role required")
    ),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn create_product(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(request): Json<CreateProductRequest>,
) -> Result<(StatusCode, Json<ProductResponse>), ServiceError> {
    require_admin(&user)?;
    let product = state.services.products.create_product(request).await?;
    Ok((StatusCode::CREATED, Json(product.into())))
}

/// Admin: update a product
#[utoipa::path(
    put,
    path = "/api/v1/admin/products/{id}",
    params(("id" = Uuid, Path, description = "Product ID")),
    request_body = UpdateProductRequest,
    responses(
        (status = 200, description = "Product updated", body = ProductResponse),
        (status = 403, description = "Admin role required"),
        (status = 404, description = "Product not found")
    ),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn update_product(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateProductRequest>,
) -> Result<Json<ProductResponse>, ServiceError> {
    require_admin(&user)?;
    let product = state.services.products.update_product(id, request).await?;
    Ok(Json(product.into()))
}
