//! Pricing & order engine: order creation with snapshot pricing and
//! discount computation, order queries, the admin status machine, and the
//! atomic payment-state transitions used by webhook reconciliation.

use chrono::{DateTime, Utc};
use rand::Rng;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    config::PricingConfig,
    db::DbPool,
    entities::order::{self, Entity as OrderEntity, Model as OrderModel},
    entities::order_item::{self, Entity as OrderItemEntity, Model as OrderItemModel},
    errors::ServiceError,
    events::{Event, EventSender},
    services::loyalty::LoyaltyService,
};

/// Order lifecycle states.
///
/// `created -> pending -> in_process -> packed -> dispatched -> completed`
/// with `created|pending -> cancelled`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Created,
    Pending,
    InProcess,
    Packed,
    Dispatched,
    Completed,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        self.into()
    }

    /// States in which payment has not yet been confirmed and the order
    /// may still be paid or cancelled
    pub fn awaiting_payment() -> [&'static str; 2] {
        [OrderStatus::Created.as_str(), OrderStatus::Pending.as_str()]
    }

    /// Whether a transition is allowed. Same-state transitions are no-ops
    /// and permitted.
    pub fn can_transition_to(self, to: OrderStatus) -> bool {
        use OrderStatus::*;
        match (self, to) {
            (Created, Pending) => true,
            (Pending, InProcess) => true,
            (InProcess, Packed) => true,
            (Packed, Dispatched) => true,
            (Dispatched, Completed) => true,
            (Created, Cancelled) | (Pending, Cancelled) => true,
            _ => self == to,
        }
    }
}

pub const DELIVERY_METHOD_PICKUP: &str = "pickup";
pub const DELIVERY_METHOD_DELIVERY: &str = "delivery";

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateOrderRequest {
    #[validate(length(min = 1, message = "Order must contain at least one item"))]
    pub items: Vec<OrderItemRequest>,
    pub points_to_redeem: Option<i32>,
    /// "pickup" or "delivery"
    pub delivery_method: String,
    pub pickup_time: Option<DateTime<Utc>>,
    pub pickup_location: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct OrderItemRequest {
    pub product_id: Uuid,
    #[validate(range(min = 1, message = "Quantity must be positive"))]
    pub quantity: i32,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpdateOrderStatusRequest {
    #[validate(length(min = 1, message = "Status is required"))]
    pub status: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderResponse {
    pub id: Uuid,
    pub order_number: String,
    pub user_id: Uuid,
    pub status: String,
    #[schema(value_type = f64)]
    pub total_amount: Decimal,
    pub points_redeemed: i32,
    #[schema(value_type = f64)]
    pub delivery_fee: Decimal,
    pub delivery_method: String,
    pub pickup_time: Option<DateTime<Utc>>,
    pub pickup_location: Option<String>,
    pub payment_session_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub items: Vec<OrderItemResponse>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderItemResponse {
    pub product_id: Uuid,
    pub quantity: i32,
    #[schema(value_type = f64)]
    pub unit_price: Decimal,
}

/// Generates a unique, roughly-sortable order number embedding the
/// creation timestamp plus a random hex suffix.
fn generate_order_number() -> String {
    let now = Utc::now();
    let suffix: u32 = rand::thread_rng().gen_range(0..0x100_0000);
    format!("BAKE-{}-{:06X}", now.format("%Y%m%d-%H%M%S"), suffix)
}

#[derive(Clone)]
pub struct OrderService {
    db: Arc<DbPool>,
    pricing: PricingConfig,
    loyalty: LoyaltyService,
    event_sender: Option<Arc<EventSender>>,
}

impl OrderService {
    pub fn new(
        db: Arc<DbPool>,
        pricing: PricingConfig,
        loyalty: LoyaltyService,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            db,
            pricing,
            loyalty,
            event_sender,
        }
    }

    /// Creates an order with snapshot pricing. All-or-nothing: any unknown
    /// or inactive product fails the whole request, and the order plus its
    /// items are persisted in one transaction.
    ///
    /// Points redemption is earmarked on the order but the loyalty balance
    /// is only debited once payment is confirmed, so an abandoned checkout
    /// never burns points.
    #[instrument(skip(self, request), fields(user_id = %user_id, item_count = request.items.len()))]
    pub async fn create_order(
        &self,
        user_id: Uuid,
        request: CreateOrderRequest,
    ) -> Result<OrderResponse, ServiceError> {
        request.validate()?;
        for item in &request.items {
            item.validate()?;
        }

        if request.delivery_method != DELIVERY_METHOD_PICKUP
            && request.delivery_method != DELIVERY_METHOD_DELIVERY
        {
            return Err(ServiceError::ValidationError(format!(
                "Unknown delivery method: {}",
                request.delivery_method
            )));
        }

        // Resolve every requested product against the active catalog;
        // prices are snapshotted here and frozen into the order items.
        let ids: Vec<Uuid> = request.items.iter().map(|i| i.product_id).collect();
        let products = crate::services::products::ProductService::new(self.db.clone())
            .find_active_by_ids(&ids)
            .await?;

        let mut snapshots = Vec::with_capacity(request.items.len());
        for item in &request.items {
            let product = products
                .iter()
                .find(|p| p.id == item.product_id)
                .ok_or_else(|| {
                    ServiceError::NotFound(format!(
                        "Product {} not found or inactive",
                        item.product_id
                    ))
                })?;
            snapshots.push((item.product_id, item.quantity, product.price));
        }

        let subtotal: Decimal = snapshots
            .iter()
            .map(|(_, quantity, unit_price)| *unit_price * Decimal::from(*quantity))
            .sum();

        let mut delivery_fee = Decimal::ZERO;
        if request.delivery_method == DELIVERY_METHOD_DELIVERY
            && subtotal < self.pricing.free_delivery_threshold
        {
            delivery_fee = self.pricing.delivery_fee;
        }

        let mut total_amount = subtotal + delivery_fee;

        // Redemption is only permitted on orders above the eligibility
        // minimum, is capped by the current balance, and may never drive
        // the total negative.
        let mut points_redeemed = 0;
        if let Some(requested) = request.points_to_redeem {
            if requested > 0 && subtotal >= self.pricing.points_min_subtotal {
                let balance = self.loyalty.get_balance(user_id).await?;
                let rate = Decimal::from(self.pricing.points_per_unit);
                let max_points_for_discount = (total_amount * rate)
                    .floor()
                    .to_i64()
                    .unwrap_or(0);

                let redeemable = i64::from(requested)
                    .min(balance)
                    .min(max_points_for_discount);

                if redeemable > 0 {
                    let discount = Decimal::from(redeemable) / rate;
                    total_amount = (total_amount - discount).max(Decimal::ZERO);
                    points_redeemed = redeemable as i32;
                }
            }
        }

        let order_id = Uuid::new_v4();
        let order_number = generate_order_number();
        let now = Utc::now();

        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for order creation");
            ServiceError::DatabaseError(e)
        })?;

        let order_model = order::ActiveModel {
            id: Set(order_id),
            order_number: Set(order_number),
            user_id: Set(user_id),
            status: Set(OrderStatus::Created.as_str().to_string()),
            total_amount: Set(total_amount),
            points_redeemed: Set(points_redeemed),
            delivery_fee: Set(delivery_fee),
            delivery_method: Set(request.delivery_method.clone()),
            pickup_time: Set(request.pickup_time),
            pickup_location: Set(request.pickup_location.clone()),
            payment_session_id: Set(None),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        }
        .insert(&txn)
        .await?;

        let item_models: Vec<order_item::ActiveModel> = snapshots
            .iter()
            .map(|(product_id, quantity, unit_price)| order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(*product_id),
                quantity: Set(*quantity),
                unit_price: Set(*unit_price),
                created_at: Set(now),
            })
            .collect();

        OrderItemEntity::insert_many(item_models).exec(&txn).await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to commit order creation");
            ServiceError::DatabaseError(e)
        })?;

        info!(
            order_id = %order_id,
            order_number = %order_model.order_number,
            total = %total_amount,
            "Order created"
        );

        if let Some(sender) = &self.event_sender {
            if let Err(e) = sender.send(Event::OrderCreated(order_id)).await {
                warn!(error = %e, order_id = %order_id, "Failed to send order created event");
            }
        }

        let items = self.items_for_order(order_id).await?;
        Ok(Self::to_response(order_model, items))
    }

    pub async fn get_order(&self, order_id: Uuid) -> Result<Option<OrderModel>, ServiceError> {
        Ok(OrderEntity::find_by_id(order_id).one(&*self.db).await?)
    }

    /// Fetches an order with ownership enforcement: customers may only see
    /// their own orders, admins may see any.
    pub async fn get_order_for_user(
        &self,
        order_id: Uuid,
        user_id: Uuid,
        is_admin: bool,
    ) -> Result<OrderResponse, ServiceError> {
        let order = self
            .get_order(order_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        if !is_admin && order.user_id != user_id {
            return Err(ServiceError::Forbidden(
                "Order belongs to another user".to_string(),
            ));
        }

        let items = self.items_for_order(order.id).await?;
        Ok(Self::to_response(order, items))
    }

    pub async fn list_orders_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<OrderResponse>, ServiceError> {
        let orders = OrderEntity::find()
            .filter(order::Column::UserId.eq(user_id))
            .order_by_desc(order::Column::CreatedAt)
            .all(&*self.db)
            .await?;

        let mut responses = Vec::with_capacity(orders.len());
        for order in orders {
            let items = self.items_for_order(order.id).await?;
            responses.push(Self::to_response(order, items));
        }
        Ok(responses)
    }

    /// Admin listing of all orders, newest first
    pub async fn list_all_orders(&self) -> Result<Vec<OrderResponse>, ServiceError> {
        let orders = OrderEntity::find()
            .order_by_desc(order::Column::CreatedAt)
            .all(&*self.db)
            .await?;

        let mut responses = Vec::with_capacity(orders.len());
        for order in orders {
            let items = self.items_for_order(order.id).await?;
            responses.push(Self::to_response(order, items));
        }
        Ok(responses)
    }

    pub async fn items_for_order(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<OrderItemModel>, ServiceError> {
        Ok(OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&*self.db)
            .await?)
    }

    /// Primary webhook lookup: by the persisted payment session id
    pub async fn find_by_payment_session(
        &self,
        session_id: &str,
    ) -> Result<Option<OrderModel>, ServiceError> {
        Ok(OrderEntity::find()
            .filter(order::Column::PaymentSessionId.eq(session_id))
            .one(&*self.db)
            .await?)
    }

    /// Records the checkout session on the order and moves it into
    /// `pending`. Guarded so a session can only attach while the order is
    /// still awaiting payment.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn attach_payment_session(
        &self,
        order_id: Uuid,
        session_id: &str,
    ) -> Result<(), ServiceError> {
        let result = OrderEntity::update_many()
            .col_expr(
                order::Column::PaymentSessionId,
                Expr::value(session_id.to_string()),
            )
            .col_expr(
                order::Column::Status,
                Expr::value(OrderStatus::Pending.as_str()),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.is_in(OrderStatus::awaiting_payment()))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::Conflict(
                "Order is no longer awaiting payment".to_string(),
            ));
        }
        Ok(())
    }

    /// Atomically transitions `created|pending -> in_process`. Implemented
    /// as a single conditional UPDATE so that two concurrent webhook
    /// deliveries cannot both win; exactly one caller observes `true` and
    /// owns the follow-up stock decrement.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn mark_paid_if_awaiting_payment(
        &self,
        order_id: Uuid,
    ) -> Result<bool, ServiceError> {
        let result = OrderEntity::update_many()
            .col_expr(
                order::Column::Status,
                Expr::value(OrderStatus::InProcess.as_str()),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.is_in(OrderStatus::awaiting_payment()))
            .exec(&*self.db)
            .await?;

        Ok(result.rows_affected == 1)
    }

    /// Atomically transitions `created|pending -> cancelled`. Returns
    /// `false` when the order had already advanced or was already
    /// cancelled, in which case the failure event is irrelevant.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn cancel_if_awaiting_payment(
        &self,
        order_id: Uuid,
    ) -> Result<bool, ServiceError> {
        let result = OrderEntity::update_many()
            .col_expr(
                order::Column::Status,
                Expr::value(OrderStatus::Cancelled.as_str()),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.is_in(OrderStatus::awaiting_payment()))
            .exec(&*self.db)
            .await?;

        Ok(result.rows_affected == 1)
    }

    /// Admin-driven status edit, validated against the lifecycle machine.
    /// Never triggers stock or loyalty side effects; those belong
    /// exclusively to the reconciliation path.
    #[instrument(skip(self), fields(order_id = %order_id, new_status = %new_status))]
    pub async fn update_status(
        &self,
        order_id: Uuid,
        new_status: &str,
    ) -> Result<OrderResponse, ServiceError> {
        let to = OrderStatus::from_str(new_status).map_err(|_| {
            ServiceError::InvalidStatus(format!("Unknown order status: {}", new_status))
        })?;

        let order = self
            .get_order(order_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let from = OrderStatus::from_str(&order.status).map_err(|_| {
            ServiceError::InternalError(format!("Order has corrupt status: {}", order.status))
        })?;

        if !from.can_transition_to(to) {
            return Err(ServiceError::InvalidStatus(format!(
                "Cannot transition from '{}' to '{}'",
                from, to
            )));
        }

        let old_status = order.status.clone();
        let mut active: order::ActiveModel = order.into();
        active.status = Set(to.as_str().to_string());
        active.updated_at = Set(Some(Utc::now()));
        let updated = active.update(&*self.db).await?;

        info!(order_id = %order_id, old = %old_status, new = %to, "Order status updated");

        if let Some(sender) = &self.event_sender {
            if let Err(e) = sender
                .send(Event::OrderStatusChanged {
                    order_id,
                    old_status,
                    new_status: to.as_str().to_string(),
                })
                .await
            {
                warn!(error = %e, order_id = %order_id, "Failed to send status changed event");
            }
        }

        let items = self.items_for_order(updated.id).await?;
        Ok(Self::to_response(updated, items))
    }

    pub fn to_response(model: OrderModel, items: Vec<OrderItemModel>) -> OrderResponse {
        OrderResponse {
            id: model.id,
            order_number: model.order_number,
            user_id: model.user_id,
            status: model.status,
            total_amount: model.total_amount,
            points_redeemed: model.points_redeemed,
            delivery_fee: model.delivery_fee,
            delivery_method: model.delivery_method,
            pickup_time: model.pickup_time,
            pickup_location: model.pickup_location,
            payment_session_id: model.payment_session_id,
            created_at: model.created_at,
            items: items
                .into_iter()
                .map(|item| OrderItemResponse {
                    product_id: item.product_id,
                    quantity: item.quantity,
                    unit_price: item.unit_price,
                })
                .collect(),
        }
    }
}
