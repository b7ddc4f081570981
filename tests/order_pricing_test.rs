//! Order creation pricing: delivery fee thresholds, points redemption
//! caps, and lifecycle validation.

mod common;

use rust_decimal_macros::dec;

use bakehouse_api::errors::ServiceError;
use bakehouse_api::services::loyalty::LoyaltyService;
use bakehouse_api::services::orders::{CreateOrderRequest, OrderItemRequest};
use common::{order_service, seed_customer, seed_product, setup_db};

fn request(
    items: Vec<OrderItemRequest>,
    delivery_method: &str,
    points: Option<i32>,
) -> CreateOrderRequest {
    CreateOrderRequest {
        items,
        points_to_redeem: points,
        delivery_method: delivery_method.to_string(),
        pickup_time: None,
        pickup_location: None,
    }
}

#[tokio::test]
async fn small_delivery_order_pays_delivery_fee() {
    let db = setup_db().await;
    let user = seed_customer(&db).await;
    let product = seed_product(&db, "Sourdough loaf", dec!(2.50), 10).await;
    let orders = order_service(db.clone());

    let order = orders
        .create_order(
            user.id,
            request(
                vec![OrderItemRequest {
                    product_id: product.id,
                    quantity: 2,
                }],
                "delivery",
                None,
            ),
        )
        .await
        .unwrap();

    assert_eq!(order.delivery_fee, dec!(1.99));
    assert_eq!(order.total_amount, dec!(6.99));
    assert_eq!(order.status, "created");
    assert!(order.order_number.starts_with("BAKE-"));
}

#[tokio::test]
async fn pickup_orders_never_pay_delivery_fee() {
    let db = setup_db().await;
    let user = seed_customer(&db).await;
    let product = seed_product(&db, "Sourdough loaf", dec!(2.50), 10).await;
    let orders = order_service(db.clone());

    let order = orders
        .create_order(
            user.id,
            request(
                vec![OrderItemRequest {
                    product_id: product.id,
                    quantity: 2,
                }],
                "pickup",
                None,
            ),
        )
        .await
        .unwrap();

    assert_eq!(order.delivery_fee, dec!(0));
    assert_eq!(order.total_amount, dec!(5.00));
}

#[tokio::test]
async fn large_delivery_order_ships_free() {
    let db = setup_db().await;
    let user = seed_customer(&db).await;
    let product = seed_product(&db, "Celebration cake", dec!(12.00), 5).await;
    let orders = order_service(db.clone());

    let order = orders
        .create_order(
            user.id,
            request(
                vec![OrderItemRequest {
                    product_id: product.id,
                    quantity: 1,
                }],
                "delivery",
                None,
            ),
        )
        .await
        .unwrap();

    assert_eq!(order.delivery_fee, dec!(0));
    assert_eq!(order.total_amount, dec!(12.00));
}

#[tokio::test]
async fn redemption_discounts_total_without_touching_balance() {
    let db = setup_db().await;
    let user = seed_customer(&db).await;
    let product = seed_product(&db, "Celebration cake", dec!(12.00), 5).await;
    let loyalty = LoyaltyService::new(db.clone());
    loyalty.award(user.id, 100, "Welcome bonus").await.unwrap();

    let orders = order_service(db.clone());
    let order = orders
        .create_order(
            user.id,
            request(
                vec![OrderItemRequest {
                    product_id: product.id,
                    quantity: 1,
                }],
                "pickup",
                Some(50),
            ),
        )
        .await
        .unwrap();

    // 50 points at 10 points per unit: a 5.00 discount
    assert_eq!(order.points_redeemed, 50);
    assert_eq!(order.total_amount, dec!(7.00));

    // Balance only moves on payment confirmation
    assert_eq!(loyalty.get_balance(user.id).await.unwrap(), 100);
}

#[tokio::test]
async fn redemption_is_capped_by_balance() {
    let db = setup_db().await;
    let user = seed_customer(&db).await;
    let product = seed_product(&db, "Celebration cake", dec!(12.00), 5).await;
    let loyalty = LoyaltyService::new(db.clone());
    loyalty.award(user.id, 30, "Welcome bonus").await.unwrap();

    let orders = order_service(db.clone());
    let order = orders
        .create_order(
            user.id,
            request(
                vec![OrderItemRequest {
                    product_id: product.id,
                    quantity: 1,
                }],
                "pickup",
                Some(100),
            ),
        )
        .await
        .unwrap();

    assert_eq!(order.points_redeemed, 30);
    assert_eq!(order.total_amount, dec!(9.00));
}

#[tokio::test]
async fn redemption_is_capped_by_order_total() {
    let db = setup_db().await;
    let user = seed_customer(&db).await;
    let product = seed_product(&db, "Bread rolls", dec!(10.00), 5).await;
    let loyalty = LoyaltyService::new(db.clone());
    loyalty.award(user.id, 500, "Welcome bonus").await.unwrap();

    let orders = order_service(db.clone());
    let order = orders
        .create_order(
            user.id,
            request(
                vec![OrderItemRequest {
                    product_id: product.id,
                    quantity: 1,
                }],
                "pickup",
                Some(200),
            ),
        )
        .await
        .unwrap();

    // At most floor(10.00 * 10) = 100 points can apply; total never goes
    // negative.
    assert_eq!(order.points_redeemed, 100);
    assert_eq!(order.total_amount, dec!(0.00));
}

#[tokio::test]
async fn redemption_requires_minimum_subtotal() {
    let db = setup_db().await;
    let user = seed_customer(&db).await;
    let product = seed_product(&db, "Sourdough loaf", dec!(2.50), 10).await;
    let loyalty = LoyaltyService::new(db.clone());
    loyalty.award(user.id, 100, "Welcome bonus").await.unwrap();

    let orders = order_service(db.clone());
    let order = orders
        .create_order(
            user.id,
            request(
                vec![OrderItemRequest {
                    product_id: product.id,
                    quantity: 2,
                }],
                "pickup",
                Some(50),
            ),
        )
        .await
        .unwrap();

    assert_eq!(order.points_redeemed, 0);
    assert_eq!(order.total_amount, dec!(5.00));
}

#[tokio::test]
async fn unknown_product_fails_the_whole_order() {
    let db = setup_db().await;
    let user = seed_customer(&db).await;
    let product = seed_product(&db, "Sourdough loaf", dec!(2.50), 10).await;
    let orders = order_service(db.clone());

    let result = orders
        .create_order(
            user.id,
            request(
                vec![
                    OrderItemRequest {
                        product_id: product.id,
                        quantity: 1,
                    },
                    OrderItemRequest {
                        product_id: uuid::Uuid::new_v4(),
                        quantity: 1,
                    },
                ],
                "pickup",
                None,
            ),
        )
        .await;

    assert!(matches!(result, Err(ServiceError::NotFound(_))));
    assert!(orders.list_orders_for_user(user.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn empty_order_is_rejected() {
    let db = setup_db().await;
    let user = seed_customer(&db).await;
    let orders = order_service(db.clone());

    let result = orders
        .create_order(user.id, request(vec![], "pickup", None))
        .await;
    assert!(matches!(result, Err(ServiceError::ValidationError(_))));
}

#[tokio::test]
async fn admin_status_updates_follow_the_lifecycle() {
    let db = setup_db().await;
    let user = seed_customer(&db).await;
    let product = seed_product(&db, "Sourdough loaf", dec!(2.50), 10).await;
    let orders = order_service(db.clone());

    let order = orders
        .create_order(
            user.id,
            request(
                vec![OrderItemRequest {
                    product_id: product.id,
                    quantity: 1,
                }],
                "pickup",
                None,
            ),
        )
        .await
        .unwrap();

    // Skipping a step is rejected
    let result = orders.update_status(order.id, "packed").await;
    assert!(matches!(result, Err(ServiceError::InvalidStatus(_))));

    for status in ["pending", "in_process", "packed", "dispatched", "completed"] {
        let updated = orders.update_status(order.id, status).await.unwrap();
        assert_eq!(updated.status, status);
    }

    // Completed orders cannot be cancelled
    let result = orders.update_status(order.id, "cancelled").await;
    assert!(matches!(result, Err(ServiceError::InvalidStatus(_))));
}

#[tokio::test]
async fn zero_quantity_items_are_rejected() {
    let db = setup_db().await;
    let user = seed_customer(&db).await;
    let product = seed_product(&db, "Sourdough loaf", dec!(2.50), 10).await;
    let orders = order_service(db.clone());

    let result = orders
        .create_order(
            user.id,
            request(
                vec![OrderItemRequest {
                    product_id: product.id,
                    quantity: 0,
                }],
                "pickup",
                None,
            ),
        )
        .await;

    assert!(matches!(result, Err(ServiceError::ValidationError(_))));
}

#[tokio::test]
async fn payment_transitions_are_won_exactly_once() {
    let db = setup_db().await;
    let user = seed_customer(&db).await;
    let product = seed_product(&db, "Sourdough loaf", dec!(2.50), 10).await;
    let orders = order_service(db.clone());

    let order = orders
        .create_order(
            user.id,
            request(
                vec![OrderItemRequest {
                    product_id: product.id,
                    quantity: 1,
                }],
                "pickup",
                None,
            ),
        )
        .await
        .unwrap();

    assert!(orders.mark_paid_if_awaiting_payment(order.id).await.unwrap());
    assert!(!orders.mark_paid_if_awaiting_payment(order.id).await.unwrap());
    assert!(!orders.cancel_if_awaiting_payment(order.id).await.unwrap());

    let stored = orders.get_order(order.id).await.unwrap().unwrap();
    assert_eq!(stored.status, "in_process");
}

#[tokio::test]
async fn customers_cannot_read_other_customers_orders() {
    let db = setup_db().await;
    let alice = seed_customer(&db).await;
    let bob = seed_customer(&db).await;
    let product = seed_product(&db, "Sourdough loaf", dec!(2.50), 10).await;
    let orders = order_service(db.clone());

    let order = orders
        .create_order(
            alice.id,
            request(
                vec![OrderItemRequest {
                    product_id: product.id,
                    quantity: 1,
                }],
                "pickup",
                None,
            ),
        )
        .await
        .unwrap();

    let result = orders.get_order_for_user(order.id, bob.id, false).await;
    assert!(matches!(result, Err(ServiceError::Forbidden(_))));

    // Admin access is unrestricted
    assert!(orders.get_order_for_user(order.id, bob.id, true).await.is_ok());
}
