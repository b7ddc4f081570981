//! Checkout orchestration: session creation, minor-unit line items, and
//! the guards around who may check out what.

mod common;

use rust_decimal_macros::dec;
use std::sync::Arc;

use bakehouse_api::auth::CurrentUser;
use bakehouse_api::errors::ServiceError;
use bakehouse_api::services::checkout::CheckoutService;
use bakehouse_api::services::loyalty::LoyaltyService;
use bakehouse_api::services::orders::{CreateOrderRequest, OrderItemRequest};
use common::{order_service, seed_customer, seed_product, setup_db, RecordingPaymentProvider};

fn checkout_service(
    db: Arc<bakehouse_api::db::DbPool>,
    provider: Arc<RecordingPaymentProvider>,
) -> CheckoutService {
    CheckoutService::new(
        db.clone(),
        provider,
        order_service(db),
        "gbp".to_string(),
        "https://shop.example.com/cart?success=true".to_string(),
        "https://shop.example.com/cart?canceled=true".to_string(),
        None,
    )
}

async fn place_order(
    db: &Arc<bakehouse_api::db::DbPool>,
    user_id: uuid::Uuid,
    product_id: uuid::Uuid,
    quantity: i32,
    delivery_method: &str,
    points: Option<i32>,
) -> bakehouse_api::services::orders::OrderResponse {
    order_service(db.clone())
        .create_order(
            user_id,
            CreateOrderRequest {
                items: vec![OrderItemRequest {
                    product_id,
                    quantity,
                }],
                points_to_redeem: points,
                delivery_method: delivery_method.to_string(),
                pickup_time: None,
                pickup_location: None,
            },
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn checkout_creates_a_session_and_marks_the_order_pending() {
    let db = setup_db().await;
    let user = seed_customer(&db).await;
    let product = seed_product(&db, "Sourdough loaf", dec!(2.50), 10).await;
    let order = place_order(&db, user.id, product.id, 2, "delivery", None).await;

    let provider = Arc::new(RecordingPaymentProvider::new());
    let checkout = checkout_service(db.clone(), provider.clone());
    let current_user: CurrentUser = user.into();

    let response = checkout.start_checkout(order.id, &current_user).await.unwrap();
    assert_eq!(response.session_id, "cs_test_session");
    assert!(response.checkout_url.contains("cs_test_session"));

    let stored = order_service(db.clone())
        .get_order(order.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, "pending");
    assert_eq!(stored.payment_session_id.as_deref(), Some("cs_test_session"));

    // 5.00 of items plus the 1.99 delivery fee, charged in minor units
    let requests = provider.requests.lock().unwrap();
    let (request, idempotency_key) = &requests[0];
    assert_eq!(*idempotency_key, format!("checkout_{}_{}", order.id, current_user.id));
    assert_eq!(request.currency, "gbp");
    let charged: i64 = request
        .line_items
        .iter()
        .map(|li| li.unit_amount_minor * i64::from(li.quantity))
        .sum();
    assert_eq!(charged, 699);
}

#[tokio::test]
async fn discounted_orders_charge_the_discounted_total() {
    let db = setup_db().await;
    let user = seed_customer(&db).await;
    let product = seed_product(&db, "Celebration cake", dec!(12.00), 10).await;

    LoyaltyService::new(db.clone())
        .award(user.id, 100, "Welcome bonus")
        .await
        .unwrap();
    let order = place_order(&db, user.id, product.id, 1, "pickup", Some(50)).await;
    assert_eq!(order.total_amount, dec!(7.00));

    let provider = Arc::new(RecordingPaymentProvider::new());
    let checkout = checkout_service(db.clone(), provider.clone());
    let current_user: CurrentUser = user.into();

    checkout.start_checkout(order.id, &current_user).await.unwrap();

    let requests = provider.requests.lock().unwrap();
    let (request, _) = &requests[0];
    let charged: i64 = request
        .line_items
        .iter()
        .map(|li| li.unit_amount_minor * i64::from(li.quantity))
        .sum();
    assert_eq!(charged, 700);
    assert_eq!(request.metadata.points_redeemed, "50");
    assert_eq!(request.metadata.order_id, order.id.to_string());
}

#[tokio::test]
async fn checkout_is_forbidden_for_other_users_orders() {
    let db = setup_db().await;
    let alice = seed_customer(&db).await;
    let bob = seed_customer(&db).await;
    let product = seed_product(&db, "Sourdough loaf", dec!(2.50), 10).await;
    let order = place_order(&db, alice.id, product.id, 1, "pickup", None).await;

    let checkout = checkout_service(db.clone(), Arc::new(RecordingPaymentProvider::new()));
    let bob_user: CurrentUser = bob.into();

    let result = checkout.start_checkout(order.id, &bob_user).await;
    assert!(matches!(result, Err(ServiceError::Forbidden(_))));
}

#[tokio::test]
async fn paid_orders_cannot_be_checked_out_again() {
    let db = setup_db().await;
    let user = seed_customer(&db).await;
    let product = seed_product(&db, "Sourdough loaf", dec!(2.50), 10).await;
    let order = place_order(&db, user.id, product.id, 1, "pickup", None).await;

    let orders = order_service(db.clone());
    assert!(orders.mark_paid_if_awaiting_payment(order.id).await.unwrap());

    let checkout = checkout_service(db.clone(), Arc::new(RecordingPaymentProvider::new()));
    let current_user: CurrentUser = user.into();

    let result = checkout.start_checkout(order.id, &current_user).await;
    assert!(matches!(result, Err(ServiceError::Conflict(_))));
}

#[tokio::test]
async fn provider_failure_surfaces_as_payment_failed() {
    let db = setup_db().await;
    let user = seed_customer(&db).await;
    let product = seed_product(&db, "Sourdough loaf", dec!(2.50), 10).await;
    let order = place_order(&db, user.id, product.id, 1, "pickup", None).await;

    let checkout = checkout_service(db.clone(), Arc::new(RecordingPaymentProvider::failing()));
    let current_user: CurrentUser = user.into();

    let result = checkout.start_checkout(order.id, &current_user).await;
    assert!(matches!(result, Err(ServiceError::PaymentFailed(_))));

    // The order is untouched and can be retried
    let stored = order_service(db.clone())
        .get_order(order.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, "created");
    assert!(stored.payment_session_id.is_none());
}
