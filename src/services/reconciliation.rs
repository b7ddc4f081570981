//! Payment-webhook reconciliation. Consumes verified provider events and
//! settles the order: loyalty award and redemption, the guarded paid
//! transition, and stock decrements. Every step is safe under duplicate
//! and out-of-order delivery.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    config::PricingConfig,
    entities::order::Model as OrderModel,
    errors::ServiceError,
    events::{Event, EventSender},
    payments::{
        PaymentObject, WebhookEvent, EVENT_INTENT_PAYMENT_FAILED, EVENT_SESSION_COMPLETED,
        EVENT_SESSION_PAYMENT_FAILED, PAYMENT_STATUS_PAID,
    },
    services::loyalty::{LedgerPurpose, LoyaltyService},
    services::orders::OrderService,
    services::products::ProductService,
};

#[derive(Clone)]
pub struct ReconciliationService {
    orders: OrderService,
    products: ProductService,
    loyalty: LoyaltyService,
    pricing: PricingConfig,
    event_sender: Option<Arc<EventSender>>,
}

impl ReconciliationService {
    pub fn new(
        orders: OrderService,
        products: ProductService,
        loyalty: LoyaltyService,
        pricing: PricingConfig,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            orders,
            products,
            loyalty,
            pricing,
            event_sender,
        }
    }

    /// Dispatches a verified webhook event. Unknown event types are logged
    /// and acknowledged; the provider must never be driven into retry
    /// storms by events we simply do not care about.
    #[instrument(skip(self, event), fields(event_type = %event.event_type))]
    pub async fn handle_event(&self, event: WebhookEvent) -> Result<(), ServiceError> {
        match event.event_type.as_str() {
            EVENT_SESSION_COMPLETED => self.handle_session_completed(&event.data.object).await,
            EVENT_SESSION_PAYMENT_FAILED | EVENT_INTENT_PAYMENT_FAILED => {
                self.handle_payment_failed(&event.data.object).await
            }
            other => {
                info!(event_type = %other, "Ignoring unhandled webhook event type");
                Ok(())
            }
        }
    }

    /// Settles a paid checkout session: append loyalty entries, win the
    /// paid transition, and decrement stock. The paid transition is a
    /// conditional UPDATE, so only one delivery of a duplicated event
    /// performs the stock decrement; the loyalty appends are independently
    /// deduped by the ledger itself.
    async fn handle_session_completed(
        &self,
        object: &PaymentObject,
    ) -> Result<(), ServiceError> {
        if object.payment_status.as_deref() != Some(PAYMENT_STATUS_PAID) {
            info!(
                payment_status = ?object.payment_status,
                "Session completed without captured payment; ignoring"
            );
            return Ok(());
        }

        let Some(order) = self.resolve_order(object).await? else {
            return Ok(());
        };

        self.settle_loyalty(&order).await;

        let won = self.orders.mark_paid_if_awaiting_payment(order.id).await?;
        if !won {
            info!(order_id = %order.id, "Order already settled; skipping fulfilment side effects");
            return Ok(());
        }

        // This caller won the transition and owns the one-time side
        // effects.
        let items = self.orders.items_for_order(order.id).await?;
        for item in &items {
            if let Err(e) = self
                .products
                .decrement_stock(item.product_id, item.quantity)
                .await
            {
                warn!(
                    error = %e,
                    order_id = %order.id,
                    product_id = %item.product_id,
                    "Stock decrement failed during settlement"
                );
            } else if let Some(sender) = &self.event_sender {
                let _ = sender
                    .send(Event::StockDecremented {
                        product_id: item.product_id,
                        quantity: item.quantity,
                    })
                    .await;
            }
        }

        info!(order_id = %order.id, "Order marked paid");

        if let Some(sender) = &self.event_sender {
            if let Err(e) = sender.send(Event::OrderPaid(order.id)).await {
                warn!(error = %e, order_id = %order.id, "Failed to send order paid event");
            }
        }

        Ok(())
    }

    /// Cancels the order if it has not already been paid. A failure event
    /// arriving after settlement is a stale race loser and is ignored.
    async fn handle_payment_failed(&self, object: &PaymentObject) -> Result<(), ServiceError> {
        let Some(order) = self.resolve_order(object).await? else {
            return Ok(());
        };

        let cancelled = self.orders.cancel_if_awaiting_payment(order.id).await?;
        if cancelled {
            info!(order_id = %order.id, "Order cancelled after payment failure");
            if let Some(sender) = &self.event_sender {
                if let Err(e) = sender.send(Event::OrderCancelled(order.id)).await {
                    warn!(error = %e, order_id = %order.id, "Failed to send order cancelled event");
                }
            }
        } else {
            info!(
                order_id = %order.id,
                status = %order.status,
                "Payment failure for order no longer awaiting payment; ignoring"
            );
        }
        Ok(())
    }

    /// Appends the award and redemption ledger entries for a paid order.
    /// Failures here are logged and swallowed: a loyalty hiccup must never
    /// leave a paid order unpaid or block fulfilment.
    async fn settle_loyalty(&self, order: &OrderModel) {
        let subtotal = match self.order_subtotal(order.id).await {
            Ok(subtotal) => subtotal,
            Err(e) => {
                warn!(error = %e, order_id = %order.id, "Failed to compute subtotal for loyalty award");
                return;
            }
        };

        if subtotal >= self.pricing.points_min_subtotal {
            let points = subtotal.floor().to_i32().unwrap_or(0);
            if points > 0 {
                match self
                    .loyalty
                    .award_for_order(
                        order.user_id,
                        order.id,
                        LedgerPurpose::Award,
                        points,
                        format!("Points earned on order {}", order.order_number),
                    )
                    .await
                {
                    Ok(true) => {
                        if let Some(sender) = &self.event_sender {
                            let _ = sender
                                .send(Event::PointsAwarded {
                                    user_id: order.user_id,
                                    order_id: order.id,
                                    points,
                                })
                                .await;
                        }
                    }
                    Ok(false) => {
                        info!(order_id = %order.id, "Points already awarded for this order");
                    }
                    Err(e) => {
                        warn!(error = %e, order_id = %order.id, "Failed to award points");
                    }
                }
            }
        }

        if order.points_redeemed > 0 {
            match self
                .loyalty
                .award_for_order(
                    order.user_id,
                    order.id,
                    LedgerPurpose::Redemption,
                    -order.points_redeemed,
                    format!("Points redeemed on order {}", order.order_number),
                )
                .await
            {
                Ok(true) => {
                    if let Some(sender) = &self.event_sender {
                        let _ = sender
                            .send(Event::PointsRedeemed {
                                user_id: order.user_id,
                                order_id: order.id,
                                points: order.points_redeemed,
                            })
                            .await;
                    }
                }
                Ok(false) => {
                    info!(order_id = %order.id, "Points already deducted for this order");
                }
                Err(e) => {
                    warn!(error = %e, order_id = %order.id, "Failed to deduct redeemed points");
                }
            }
        }
    }

    async fn order_subtotal(&self, order_id: Uuid) -> Result<Decimal, ServiceError> {
        let items = self.orders.items_for_order(order_id).await?;
        Ok(items
            .iter()
            .map(|item| item.unit_price * Decimal::from(item.quantity))
            .sum())
    }

    /// Maps a webhook object to a local order: by the persisted session id
    /// first, then by the order id round-tripped through session metadata.
    /// An unresolvable event is logged and dropped so the provider gets a
    /// 200 and stops retrying.
    async fn resolve_order(
        &self,
        object: &PaymentObject,
    ) -> Result<Option<OrderModel>, ServiceError> {
        if let Some(session_id) = object.id.as_deref() {
            if let Some(order) = self.orders.find_by_payment_session(session_id).await? {
                return Ok(Some(order));
            }
        }

        if let Some(raw) = object.metadata.order_id.as_deref() {
            match Uuid::parse_str(raw) {
                Ok(order_id) => {
                    if let Some(order) = self.orders.get_order(order_id).await? {
                        return Ok(Some(order));
                    }
                }
                Err(_) => {
                    warn!(order_id = %raw, "Webhook metadata carried a malformed order id");
                }
            }
        }

        warn!(
            session_id = ?object.id,
            metadata_order_id = ?object.metadata.order_id,
            "Webhook event could not be mapped to an order; acknowledging as no-op"
        );
        Ok(None)
    }
}
