//! Webhook reconciliation: settlement side effects, idempotency under
//! duplicate delivery, and out-of-order failure events.

mod common;

use rust_decimal_macros::dec;
use uuid::Uuid;

use bakehouse_api::payments::WebhookEvent;
use bakehouse_api::services::loyalty::LoyaltyService;
use bakehouse_api::services::orders::{CreateOrderRequest, OrderItemRequest, OrderResponse};
use bakehouse_api::services::products::ProductService;
use common::{order_service, reconciliation_service, seed_customer, seed_product, setup_db};

fn completed_event(session_id: &str, order_id: Option<Uuid>, payment_status: &str) -> WebhookEvent {
    let mut object = serde_json::json!({
        "id": session_id,
        "payment_status": payment_status,
        "metadata": {}
    });
    if let Some(id) = order_id {
        object["metadata"]["order_id"] = serde_json::json!(id.to_string());
    }

    serde_json::from_value(serde_json::json!({
        "id": format!("evt_{}", Uuid::new_v4().simple()),
        "type": "checkout.session.completed",
        "data": { "object": object }
    }))
    .unwrap()
}

fn failed_event(event_type: &str, session_id: &str) -> WebhookEvent {
    serde_json::from_value(serde_json::json!({
        "type": event_type,
        "data": { "object": { "id": session_id, "metadata": {} } }
    }))
    .unwrap()
}

async fn place_order(
    db: &std::sync::Arc<bakehouse_api::db::DbPool>,
    user_id: Uuid,
    product_id: Uuid,
    points: Option<i32>,
) -> OrderResponse {
    let orders = order_service(db.clone());
    let order = orders
        .create_order(
            user_id,
            CreateOrderRequest {
                items: vec![OrderItemRequest {
                    product_id,
                    quantity: 1,
                }],
                points_to_redeem: points,
                delivery_method: "pickup".to_string(),
                pickup_time: None,
                pickup_location: None,
            },
        )
        .await
        .unwrap();
    orders
        .attach_payment_session(order.id, &format!("cs_{}", order.id.simple()))
        .await
        .unwrap();
    order
}

#[tokio::test]
async fn paid_session_settles_the_order() {
    let db = setup_db().await;
    let user = seed_customer(&db).await;
    let product = seed_product(&db, "Celebration cake", dec!(12.00), 10).await;
    let order = place_order(&db, user.id, product.id, None).await;

    let recon = reconciliation_service(db.clone());
    recon
        .handle_event(completed_event(
            &format!("cs_{}", order.id.simple()),
            None,
            "paid",
        ))
        .await
        .unwrap();

    let orders = order_service(db.clone());
    let settled = orders.get_order(order.id).await.unwrap().unwrap();
    assert_eq!(settled.status, "in_process");

    let stocked = ProductService::new(db.clone())
        .get_product(product.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stocked.stock, 9);

    // floor(12.00) points awarded
    let loyalty = LoyaltyService::new(db.clone());
    assert_eq!(loyalty.get_balance(user.id).await.unwrap(), 12);
}

#[tokio::test]
async fn duplicate_delivery_settles_exactly_once() {
    let db = setup_db().await;
    let user = seed_customer(&db).await;
    let product = seed_product(&db, "Celebration cake", dec!(12.00), 10).await;
    let order = place_order(&db, user.id, product.id, None).await;

    let event = completed_event(&format!("cs_{}", order.id.simple()), None, "paid");
    let recon = reconciliation_service(db.clone());
    recon.handle_event(event.clone()).await.unwrap();
    recon.handle_event(event.clone()).await.unwrap();
    recon.handle_event(event).await.unwrap();

    let stocked = ProductService::new(db.clone())
        .get_product(product.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stocked.stock, 9);

    let loyalty = LoyaltyService::new(db.clone());
    assert_eq!(loyalty.get_balance(user.id).await.unwrap(), 12);
    assert_eq!(loyalty.get_history(user.id, 50).await.unwrap().len(), 1);
}

#[tokio::test]
async fn settlement_deducts_redeemed_points() {
    let db = setup_db().await;
    let user = seed_customer(&db).await;
    let product = seed_product(&db, "Celebration cake", dec!(12.00), 10).await;

    let loyalty = LoyaltyService::new(db.clone());
    loyalty.award(user.id, 200, "Welcome bonus").await.unwrap();

    let order = place_order(&db, user.id, product.id, Some(50)).await;
    assert_eq!(order.points_redeemed, 50);

    let recon = reconciliation_service(db.clone());
    let event = completed_event(&format!("cs_{}", order.id.simple()), None, "paid");
    recon.handle_event(event.clone()).await.unwrap();
    recon.handle_event(event).await.unwrap();

    // 200 starting + 12 awarded - 50 redeemed, applied once
    assert_eq!(loyalty.get_balance(user.id).await.unwrap(), 162);
}

#[tokio::test]
async fn unpaid_session_completion_is_ignored() {
    let db = setup_db().await;
    let user = seed_customer(&db).await;
    let product = seed_product(&db, "Celebration cake", dec!(12.00), 10).await;
    let order = place_order(&db, user.id, product.id, None).await;

    let recon = reconciliation_service(db.clone());
    recon
        .handle_event(completed_event(
            &format!("cs_{}", order.id.simple()),
            None,
            "unpaid",
        ))
        .await
        .unwrap();

    let orders = order_service(db.clone());
    let unchanged = orders.get_order(order.id).await.unwrap().unwrap();
    assert_eq!(unchanged.status, "pending");

    let loyalty = LoyaltyService::new(db.clone());
    assert_eq!(loyalty.get_balance(user.id).await.unwrap(), 0);
}

#[tokio::test]
async fn payment_failure_cancels_an_unpaid_order() {
    let db = setup_db().await;
    let user = seed_customer(&db).await;
    let product = seed_product(&db, "Celebration cake", dec!(12.00), 10).await;
    let order = place_order(&db, user.id, product.id, None).await;

    let recon = reconciliation_service(db.clone());
    recon
        .handle_event(failed_event(
            "checkout.session.async_payment_failed",
            &format!("cs_{}", order.id.simple()),
        ))
        .await
        .unwrap();

    let orders = order_service(db.clone());
    let cancelled = orders.get_order(order.id).await.unwrap().unwrap();
    assert_eq!(cancelled.status, "cancelled");
}

#[tokio::test]
async fn late_failure_never_reverts_a_paid_order() {
    let db = setup_db().await;
    let user = seed_customer(&db).await;
    let product = seed_product(&db, "Celebration cake", dec!(12.00), 10).await;
    let order = place_order(&db, user.id, product.id, None).await;
    let session_id = format!("cs_{}", order.id.simple());

    let recon = reconciliation_service(db.clone());
    recon
        .handle_event(completed_event(&session_id, None, "paid"))
        .await
        .unwrap();
    recon
        .handle_event(failed_event("payment_intent.payment_failed", &session_id))
        .await
        .unwrap();

    let orders = order_service(db.clone());
    let settled = orders.get_order(order.id).await.unwrap().unwrap();
    assert_eq!(settled.status, "in_process");
}

#[tokio::test]
async fn metadata_order_id_resolves_when_session_is_unknown() {
    let db = setup_db().await;
    let user = seed_customer(&db).await;
    let product = seed_product(&db, "Celebration cake", dec!(12.00), 10).await;
    let order = place_order(&db, user.id, product.id, None).await;

    let recon = reconciliation_service(db.clone());
    recon
        .handle_event(completed_event("cs_never_persisted", Some(order.id), "paid"))
        .await
        .unwrap();

    let orders = order_service(db.clone());
    let settled = orders.get_order(order.id).await.unwrap().unwrap();
    assert_eq!(settled.status, "in_process");
}

#[tokio::test]
async fn unresolvable_event_is_acknowledged_as_noop() {
    let db = setup_db().await;
    let recon = reconciliation_service(db.clone());

    recon
        .handle_event(completed_event(
            "cs_unknown",
            Some(Uuid::new_v4()),
            "paid",
        ))
        .await
        .unwrap();
}

#[tokio::test]
async fn small_orders_earn_no_points() {
    let db = setup_db().await;
    let user = seed_customer(&db).await;
    let product = seed_product(&db, "Sourdough loaf", dec!(5.00), 10).await;
    let order = place_order(&db, user.id, product.id, None).await;

    let recon = reconciliation_service(db.clone());
    recon
        .handle_event(completed_event(
            &format!("cs_{}", order.id.simple()),
            None,
            "paid",
        ))
        .await
        .unwrap();

    let orders = order_service(db.clone());
    let settled = orders.get_order(order.id).await.unwrap().unwrap();
    assert_eq!(settled.status, "in_process");

    let loyalty = LoyaltyService::new(db.clone());
    assert_eq!(loyalty.get_balance(user.id).await.unwrap(), 0);

    let stocked = ProductService::new(db.clone())
        .get_product(product.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stocked.stock, 9);
}
