mod common;

use assert_matches::assert_matches;
use axum::http::{Method, StatusCode};
use serde_json::json;

use axionik_checkout::errors::ServiceError;
use axionik_checkout::models::{DeliveryStatus, OrderStatus};
use common::{razorpay_event, read_json, TestApp};

async fn paid_order(app: &TestApp, product_id: &str, qty: i64) -> String {
    let order_id = app.checkout(&[(product_id, qty)]).await.unwrap();
    let body = razorpay_event("payment.captured", &order_id, "pay_1");
    let response = app
        .razorpay_webhook(&format!("evt_{}", order_id), &body)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    order_id
}

async fn set_status(app: &TestApp, order_id: &str, status: &str) -> axum::response::Response {
    app.request(
        Method::POST,
        &format!("/admin/order/{}/status", order_id),
        Some(json!({ "status": status })),
    )
    .await
}

async fn track(app: &TestApp, order_id: &str) -> String {
    let body = read_json(
        app.request(
            Method::GET,
            &format!("/chat-track-order?orderId={}", order_id),
            None,
        )
        .await,
    )
    .await;
    body["message"].as_str().unwrap_or_default().to_string()
}

#[tokio::test]
async fn delivery_advances_one_step_at_a_time() {
    let app = TestApp::new().await;
    app.seed_product("P1", 10_000, 5).await;
    let order_id = paid_order(&app, "P1", 1).await;

    assert_eq!(track(&app, &order_id).await, "Your order is processing.");

    // processing -> delivered skips a step
    let response = set_status(&app, &order_id, "delivered").await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(read_json(response).await["code"], "invalid_transition");

    let response = set_status(&app, &order_id, "shipped").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await["order"]["deliveryStatus"], "shipped");
    assert_eq!(track(&app, &order_id).await, "Your order is shipped.");

    // Repeating the current status is accepted as a no-op.
    let response = set_status(&app, &order_id, "shipped").await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = set_status(&app, &order_id, "processing").await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = set_status(&app, &order_id, "Delivered").await;
    assert_eq!(response.status(), StatusCode::OK);
    let order = app.order(&order_id).await;
    assert_eq!(order.delivery_status, DeliveryStatus::Delivered);
    assert_eq!(order.status, OrderStatus::Paid);
}

#[tokio::test]
async fn delivery_status_needs_a_paid_order() {
    let app = TestApp::new().await;
    app.seed_product("P1", 10_000, 5).await;
    let order_id = app.checkout(&[("P1", 1)]).await.unwrap();

    let response = set_status(&app, &order_id, "shipped").await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = set_status(&app, &order_id, "teleported").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = set_status(&app, "ORD-MISSING", "shipped").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn refund_is_terminal_and_keeps_stock_committed() {
    let app = TestApp::new().await;
    app.seed_product("P1", 10_000, 5).await;
    let order_id = paid_order(&app, "P1", 2).await;
    assert_eq!(app.on_hand("P1").await, 3);

    let response = app
        .request(
            Method::POST,
            &format!("/admin/order/{}/refund", order_id),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await["order"]["status"], "refunded");

    let response = app
        .request(
            Method::POST,
            &format!("/admin/order/{}/refund", order_id),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let order = app.order(&order_id).await;
    assert_eq!(order.status, OrderStatus::Refunded);
    assert!(order.refunded_at.is_some());
    assert_eq!(app.on_hand("P1").await, 3);
    assert_eq!(track(&app, &order_id).await, "Your order has been refunded.");

    // Delivery updates stop once refunded.
    assert_matches!(
        app.services()
            .orders
            .set_delivery_status(&order_id, DeliveryStatus::Shipped)
            .await,
        Err(ServiceError::InvalidTransition(_))
    );
}

#[tokio::test]
async fn unpaid_orders_cannot_be_refunded() {
    let app = TestApp::new().await;
    app.seed_product("P1", 10_000, 5).await;
    let order_id = app.checkout(&[("P1", 1)]).await.unwrap();

    assert_matches!(
        app.services().orders.refund(&order_id).await,
        Err(ServiceError::InvalidTransition(_))
    );
    assert_eq!(app.order(&order_id).await.status, OrderStatus::PaymentPending);
}

#[tokio::test]
async fn restock_adds_to_on_hand() {
    let app = TestApp::new().await;
    app.seed_product("P1", 10_000, 2).await;
    paid_order(&app, "P1", 2).await;
    assert_eq!(app.available("P1").await, 0);

    let response = app
        .request(
            Method::POST,
            "/admin/inventory/P1/restock",
            Some(json!({ "quantity": 7 })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["productId"], "P1");
    assert_eq!(body["stock"]["onHand"], 7);
    assert_eq!(app.available("P1").await, 7);

    let response = app
        .request(
            Method::POST,
            "/admin/inventory/P1/restock",
            Some(json!({ "quantity": 0 })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .request(
            Method::POST,
            "/admin/inventory/NOPE/restock",
            Some(json!({ "quantity": 3 })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn admin_lists_paid_orders_by_default() {
    let app = TestApp::new().await;
    app.seed_product("P1", 10_000, 10).await;
    let paid = paid_order(&app, "P1", 1).await;
    let pending = app.checkout(&[("P1", 1)]).await.unwrap();

    let body = read_json(app.request(Method::GET, "/admin/orders", None).await).await;
    assert_eq!(body["count"], 1);
    assert_eq!(body["orders"][0]["orderId"], paid.as_str());

    let body = read_json(
        app.request(Method::GET, "/admin/orders?status=payment_pending", None)
            .await,
    )
    .await;
    assert_eq!(body["count"], 1);
    assert_eq!(body["orders"][0]["orderId"], pending.as_str());

    let body = read_json(app.request(Method::GET, "/admin/orders?status=all", None).await).await;
    assert_eq!(body["count"], 2);

    let response = app
        .request(Method::GET, "/admin/orders?status=lost", None)
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn tracking_hides_orders_that_were_never_paid() {
    let app = TestApp::new().await;
    app.seed_product("P1", 10_000, 5).await;
    let pending = app.checkout(&[("P1", 1)]).await.unwrap();

    let sorry = "Sorry, we couldn't find a paid order with that ID.";
    assert_eq!(track(&app, &pending).await, sorry);
    assert_eq!(track(&app, "ORD-UNKNOWN").await, sorry);

    let response = app
        .request(Method::GET, "/order/ORD-UNKNOWN", None)
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
