//! Hosted-checkout orchestration: turns a stored order into a provider
//! checkout session and records the session handle on the order.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    auth::{is_placeholder_email, CurrentUser},
    db::DbPool,
    entities::order::Model as OrderModel,
    entities::order_item::Model as OrderItemModel,
    errors::ServiceError,
    events::{Event, EventSender},
    payments::{
        CheckoutLineItem, CreateSessionRequest, PaymentProvider, SessionMetadata,
    },
    services::orders::{OrderService, OrderStatus},
    services::products::ProductService,
};
use std::str::FromStr;

#[derive(Debug, Serialize, ToSchema)]
pub struct CheckoutResponse {
    pub session_id: String,
    pub checkout_url: String,
}

#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DbPool>,
    provider: Arc<dyn PaymentProvider>,
    orders: OrderService,
    currency: String,
    success_url: String,
    cancel_url: String,
    event_sender: Option<Arc<EventSender>>,
}

impl CheckoutService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<DbPool>,
        provider: Arc<dyn PaymentProvider>,
        orders: OrderService,
        currency: String,
        success_url: String,
        cancel_url: String,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            db,
            provider,
            orders,
            currency,
            success_url,
            cancel_url,
            event_sender,
        }
    }

    /// Starts a hosted checkout for an order the caller owns. The order
    /// must still be awaiting payment; retried clicks reuse the same
    /// provider session via the idempotency key.
    #[instrument(skip(self, user), fields(order_id = %order_id, user_id = %user.id))]
    pub async fn start_checkout(
        &self,
        order_id: Uuid,
        user: &CurrentUser,
    ) -> Result<CheckoutResponse, ServiceError> {
        let order = self
            .orders
            .get_order(order_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        if order.user_id != user.id {
            return Err(ServiceError::Forbidden(
                "Order belongs to another user".to_string(),
            ));
        }

        let status = OrderStatus::from_str(&order.status).map_err(|_| {
            ServiceError::InternalError(format!("Order has corrupt status: {}", order.status))
        })?;
        if !matches!(status, OrderStatus::Created | OrderStatus::Pending) {
            return Err(ServiceError::Conflict(format!(
                "Order in status '{}' cannot be checked out",
                order.status
            )));
        }

        let items = self.orders.items_for_order(order.id).await?;
        if items.is_empty() {
            return Err(ServiceError::Conflict("Order has no items".to_string()));
        }

        let line_items = self.build_line_items(&order, &items).await?;

        // Placeholder addresses are synthetic and must never reach the
        // provider's receipt machinery.
        let customer_email = if is_placeholder_email(&user.email) {
            None
        } else {
            Some(user.email.clone())
        };

        let idempotency_key = format!("checkout_{}_{}", order.id, user.id);
        let request = CreateSessionRequest {
            line_items,
            currency: self.currency.clone(),
            customer_email,
            metadata: SessionMetadata {
                order_id: order.id.to_string(),
                user_id: user.id.to_string(),
                points_redeemed: order.points_redeemed.to_string(),
            },
            success_url: self.success_url.clone(),
            cancel_url: self.cancel_url.clone(),
        };

        let session = self
            .provider
            .create_session(request, &idempotency_key)
            .await
            .map_err(|e| match e {
                ServiceError::ExternalServiceError(msg) => {
                    ServiceError::PaymentFailed(format!("Checkout failed: {}", msg))
                }
                other => other,
            })?;

        self.orders
            .attach_payment_session(order.id, &session.id)
            .await?;

        info!(order_id = %order.id, session_id = %session.id, "Checkout session created");

        if let Some(sender) = &self.event_sender {
            if let Err(e) = sender
                .send(Event::CheckoutStarted {
                    order_id: order.id,
                    session_id: session.id.clone(),
                })
                .await
            {
                warn!(error = %e, order_id = %order.id, "Failed to send checkout started event");
            }
        }

        Ok(CheckoutResponse {
            session_id: session.id,
            checkout_url: session.url,
        })
    }

    /// Builds provider line items in minor units. The order total already
    /// folds in delivery and any points discount, so each item's snapshot
    /// price is scaled proportionally, rounded down, and any remainder is
    /// carried on a one-off adjustment line. The provider is always
    /// charged exactly the stored total.
    async fn build_line_items(
        &self,
        order: &OrderModel,
        items: &[OrderItemModel],
    ) -> Result<Vec<CheckoutLineItem>, ServiceError> {
        let products = ProductService::new(self.db.clone());

        let items_subtotal: Decimal = items
            .iter()
            .map(|item| item.unit_price * Decimal::from(item.quantity))
            .sum();
        if items_subtotal <= Decimal::ZERO {
            return Err(ServiceError::Conflict(
                "Order has a non-positive subtotal".to_string(),
            ));
        }

        let ratio = order.total_amount / items_subtotal;
        let total_minor = floor_minor_units(order.total_amount)?;

        let mut line_items = Vec::with_capacity(items.len() + 1);
        let mut charged_minor: i64 = 0;

        for item in items {
            let name = match products.get_product(item.product_id).await? {
                Some(product) => product.name,
                None => format!("Item {}", item.product_id),
            };

            // Flooring guarantees the scaled lines never exceed the order
            // total.
            let unit_amount_minor = floor_minor_units(item.unit_price * ratio)?;
            charged_minor += unit_amount_minor * i64::from(item.quantity);

            line_items.push(CheckoutLineItem {
                name,
                description: None,
                unit_amount_minor,
                quantity: item.quantity,
            });
        }

        let remainder = total_minor - charged_minor;
        if remainder < 0 {
            return Err(ServiceError::InternalError(
                "line item scaling overflowed the order total".to_string(),
            ));
        }
        if remainder > 0 {
            line_items.push(CheckoutLineItem {
                name: "Delivery and rounding".to_string(),
                description: None,
                unit_amount_minor: remainder,
                quantity: 1,
            });
        }

        Ok(line_items)
    }
}

fn floor_minor_units(amount: Decimal) -> Result<i64, ServiceError> {
    (amount * Decimal::from(100))
        .floor()
        .to_i64()
        .ok_or_else(|| {
            ServiceError::InternalError("amount out of range for minor units".to_string())
        })
}
