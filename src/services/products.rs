use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    db::DbPool,
    entities::product::{self, Entity as ProductEntity, Model as ProductModel},
    errors::ServiceError,
};

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateProductRequest {
    #[validate(length(min = 1, max = 255, message = "Product name is required"))]
    pub name: String,
    pub description: Option<String>,
    #[schema(value_type = f64)]
    pub price: Decimal,
    #[validate(length(min = 1, message = "Category is required"))]
    pub category: String,
    pub image_url: Option<String>,
    #[validate(range(min = 0, message = "Stock cannot be negative"))]
    pub stock: i32,
    pub pack_size: Option<i32>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpdateProductRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    #[schema(value_type = Option<f64>)]
    pub price: Option<Decimal>,
    pub category: Option<String>,
    pub image_url: Option<String>,
    #[validate(range(min = 0, message = "Stock cannot be negative"))]
    pub stock: Option<i32>,
    pub is_active: Option<bool>,
    pub pack_size: Option<i32>,
}

/// Catalog and stock operations. Admin actions mutate the catalog; the
/// reconciliation handler only ever calls `decrement_stock`.
#[derive(Clone)]
pub struct ProductService {
    db: Arc<DbPool>,
}

impl ProductService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    #[instrument(skip(self, request), fields(name = %request.name))]
    pub async fn create_product(
        &self,
        request: CreateProductRequest,
    ) -> Result<ProductModel, ServiceError> {
        request.validate()?;

        if request.price < Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "Price cannot be negative".to_string(),
            ));
        }

        let model = product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(request.name),
            description: Set(request.description),
            price: Set(request.price),
            category: Set(request.category),
            image_url: Set(request.image_url),
            stock: Set(request.stock),
            is_active: Set(true),
            pack_size: Set(request.pack_size),
            ..Default::default()
        }
        .insert(&*self.db)
        .await?;

        info!(product_id = %model.id, "Product created");
        Ok(model)
    }

    #[instrument(skip(self, request), fields(product_id = %product_id))]
    pub async fn update_product(
        &self,
        product_id: Uuid,
        request: UpdateProductRequest,
    ) -> Result<ProductModel, ServiceError> {
        request.validate()?;

        let product = ProductEntity::find_by_id(product_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Product {} not found", product_id))
            })?;

        if let Some(price) = request.price {
            if price < Decimal::ZERO {
                return Err(ServiceError::ValidationError(
                    "Price cannot be negative".to_string(),
                ));
            }
        }

        let mut active: product::ActiveModel = product.into();
        if let Some(name) = request.name {
            active.name = Set(name);
        }
        if let Some(description) = request.description {
            active.description = Set(Some(description));
        }
        if let Some(price) = request.price {
            active.price = Set(price);
        }
        if let Some(category) = request.category {
            active.category = Set(category);
        }
        if let Some(image_url) = request.image_url {
            active.image_url = Set(Some(image_url));
        }
        if let Some(stock) = request.stock {
            active.stock = Set(stock);
        }
        if let Some(is_active) = request.is_active {
            active.is_active = Set(is_active);
        }
        if let Some(pack_size) = request.pack_size {
            active.pack_size = Set(Some(pack_size));
        }

        let updated = active.update(&*self.db).await?;
        info!(product_id = %product_id, "Product updated");
        Ok(updated)
    }

    pub async fn get_product(&self, product_id: Uuid) -> Result<Option<ProductModel>, ServiceError> {
        Ok(ProductEntity::find_by_id(product_id).one(&*self.db).await?)
    }

    /// Storefront listing: active products only
    pub async fn list_active(&self) -> Result<Vec<ProductModel>, ServiceError> {
        let products = ProductEntity::find()
            .filter(product::Column::IsActive.eq(true))
            .order_by_asc(product::Column::Name)
            .all(&*self.db)
            .await?;
        Ok(products)
    }

    /// Admin listing: everything, inactive included
    pub async fn list_all(&self) -> Result<Vec<ProductModel>, ServiceError> {
        let products = ProductEntity::find()
            .order_by_asc(product::Column::Name)
            .all(&*self.db)
            .await?;
        Ok(products)
    }

    /// Resolves the requested ids against currently-active products. The
    /// order engine fails the whole order if any id is missing from the
    /// result.
    pub async fn find_active_by_ids(
        &self,
        ids: &[Uuid],
    ) -> Result<Vec<ProductModel>, ServiceError> {
        let products = ProductEntity::find()
            .filter(product::Column::Id.is_in(ids.iter().copied()))
            .filter(product::Column::IsActive.eq(true))
            .all(&*self.db)
            .await?;
        Ok(products)
    }

    /// Decrements stock by `quantity` as a single in-place update. Called
    /// once per item from the guarded payment transition, so it is never
    /// repeated for the same order.
    #[instrument(skip(self), fields(product_id = %product_id, quantity = quantity))]
    pub async fn decrement_stock(
        &self,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<(), ServiceError> {
        let result = ProductEntity::update_many()
            .col_expr(
                product::Column::Stock,
                Expr::col(product::Column::Stock).sub(quantity),
            )
            .filter(product::Column::Id.eq(product_id))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            warn!(product_id = %product_id, "Stock decrement matched no product row");
        }
        Ok(())
    }
}
