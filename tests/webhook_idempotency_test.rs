mod common;

use axum::http::StatusCode;
use futures::future::join_all;

use axionik_checkout::models::{Order, OrderStatus};
use axionik_checkout::payments::{GatewayEvent, GatewayEventKind};
use common::{razorpay_event, read_json, TestApp};

#[tokio::test]
async fn redelivered_event_is_acknowledged_as_duplicate() {
    let app = TestApp::new().await;
    app.seed_product("P1", 10_000, 5).await;
    let order_id = app.checkout(&[("P1", 2)]).await.unwrap();

    let body = razorpay_event("payment.captured", &order_id, "pay_1");
    let first = app.razorpay_webhook("evt_1", &body).await;
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(read_json(first).await["outcome"], "applied");

    let second = app.razorpay_webhook("evt_1", &body).await;
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(read_json(second).await["outcome"], "duplicate");

    assert_eq!(app.order(&order_id).await.status, OrderStatus::Paid);
    assert_eq!(app.on_hand("P1").await, 3);
    assert_eq!(app.available("P1").await, 3);
}

#[tokio::test]
async fn distinct_success_events_for_one_order_commit_once() {
    let app = TestApp::new().await;
    app.seed_product("P1", 10_000, 5).await;
    let order_id = app.checkout(&[("P1", 2)]).await.unwrap();

    let paid = razorpay_event("order.paid", &order_id, "pay_1");
    let captured = razorpay_event("payment.captured", &order_id, "pay_1");

    let response = app.razorpay_webhook("evt_paid", &paid).await;
    assert_eq!(read_json(response).await["outcome"], "applied");
    let response = app.razorpay_webhook("evt_captured", &captured).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await["outcome"], "ignored");

    assert_eq!(app.on_hand("P1").await, 3);
}

#[tokio::test]
async fn concurrent_deliveries_apply_exactly_once() {
    let app = TestApp::new().await;
    app.seed_product("P1", 10_000, 10).await;
    let order_id = app.checkout(&[("P1", 4)]).await.unwrap();

    let bodies: Vec<(String, String)> = (0..8)
        .map(|i| {
            (
                format!("evt_{}", i),
                razorpay_event("payment.captured", &order_id, &format!("pay_{}", i)),
            )
        })
        .collect();

    let responses = join_all(
        bodies
            .iter()
            .map(|(event_id, body)| app.razorpay_webhook(event_id, body)),
    )
    .await;

    let mut applied = 0;
    for response in responses {
        assert_eq!(response.status(), StatusCode::OK);
        if read_json(response).await["outcome"] == "applied" {
            applied += 1;
        }
    }
    assert_eq!(applied, 1);
    assert_eq!(app.on_hand("P1").await, 6);
    assert_eq!(app.available("P1").await, 6);
}

#[tokio::test]
async fn bad_signature_is_rejected_without_state_change() {
    let app = TestApp::new().await;
    app.seed_product("P1", 10_000, 5).await;
    let order_id = app.checkout(&[("P1", 1)]).await.unwrap();

    let body = razorpay_event("payment.captured", &order_id, "pay_1");
    let response = app
        .razorpay_webhook_with_signature("evt_1", &body, &"0".repeat(64))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(read_json(response).await["code"], "invalid_signature");

    assert_eq!(app.order(&order_id).await.status, OrderStatus::PaymentPending);
    assert_eq!(app.on_hand("P1").await, 5);

    // A rejected delivery must not burn the event id.
    let response = app.razorpay_webhook("evt_1", &body).await;
    assert_eq!(read_json(response).await["outcome"], "applied");
}

#[tokio::test]
async fn tampered_body_fails_verification() {
    let app = TestApp::new().await;
    app.seed_product("P1", 10_000, 5).await;
    let order_id = app.checkout(&[("P1", 1)]).await.unwrap();

    let signed = razorpay_event("payment.failed", &order_id, "pay_1");
    let signature =
        axionik_checkout::payments::signature::hmac_sha256_hex(common::WEBHOOK_SECRET, signed.as_bytes())
            .unwrap();
    let tampered = razorpay_event("payment.captured", &order_id, "pay_1");

    let response = app
        .razorpay_webhook_with_signature("evt_1", &tampered, &signature)
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(app.order(&order_id).await.status, OrderStatus::PaymentPending);
}

#[tokio::test]
async fn unknown_order_is_acknowledged() {
    let app = TestApp::new().await;

    let body = razorpay_event("payment.captured", "ORD-MISSING", "pay_1");
    let response = app.razorpay_webhook("evt_1", &body).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await["outcome"], "ignored");
}

#[tokio::test]
async fn unhandled_event_types_are_ignored() {
    let app = TestApp::new().await;
    app.seed_product("P1", 10_000, 5).await;
    let order_id = app.checkout(&[("P1", 1)]).await.unwrap();

    let body = razorpay_event("refund.created", &order_id, "pay_1");
    let response = app.razorpay_webhook("evt_1", &body).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await["outcome"], "ignored");
    assert_eq!(app.order(&order_id).await.status, OrderStatus::PaymentPending);
}

#[tokio::test]
async fn declined_attempt_then_successful_retry_pays_the_order() {
    let app = TestApp::new().await;
    app.seed_product("P1", 10_000, 5).await;
    let order_id = app.checkout(&[("P1", 1)]).await.unwrap();

    let declined = razorpay_event("payment.failed", &order_id, "pay_1");
    let response = app.razorpay_webhook("evt_declined", &declined).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await["outcome"], "ignored");

    let order = app.order(&order_id).await;
    assert_eq!(order.status, OrderStatus::PaymentPending);
    assert_eq!(app.available("P1").await, 4);

    let retry = razorpay_event("payment.captured", &order_id, "pay_2");
    let response = app.razorpay_webhook("evt_retry", &retry).await;
    assert_eq!(read_json(response).await["outcome"], "applied");

    assert_eq!(app.order(&order_id).await.status, OrderStatus::Paid);
    assert_eq!(app.on_hand("P1").await, 4);
    assert_eq!(app.available("P1").await, 4);
}

#[tokio::test]
async fn terminal_failure_cancels_and_releases_stock() {
    let app = TestApp::new().await;
    app.seed_product("P1", 10_000, 5).await;
    let order_id = app.checkout(&[("P1", 3)]).await.unwrap();
    assert_eq!(app.available("P1").await, 2);

    let expired = GatewayEvent {
        event_id: Some("evt_expired".into()),
        event_type: "checkout.session.expired".into(),
        kind: GatewayEventKind::Failed,
        order_id: Some(order_id.clone()),
        gateway_ref: None,
    };
    let outcome = app
        .services()
        .orders
        .handle_payment_event("razorpay", &expired)
        .await
        .unwrap();
    assert_eq!(outcome.label(), "applied");

    let order = app.order(&order_id).await;
    assert_eq!(order.status, OrderStatus::Cancelled);
    assert!(order.cancelled_at.is_some());
    assert_eq!(app.available("P1").await, 5);
    assert_eq!(app.on_hand("P1").await, 5);

    // A success arriving after the session ended leaves the order cancelled.
    let late = razorpay_event("payment.captured", &order_id, "pay_2");
    let response = app.razorpay_webhook("evt_late", &late).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await["outcome"], "ignored");
    assert_eq!(app.order(&order_id).await.status, OrderStatus::Cancelled);
    assert_eq!(app.on_hand("P1").await, 5);
}

#[tokio::test]
async fn event_id_is_recorded_only_after_the_event_applies() {
    let app = TestApp::new().await;
    let key = "order:ORD-AWAITING";
    let mut order = Order::new(
        "ORD-AWAITING".into(),
        "s1".into(),
        vec![],
        "INR".into(),
        vec![],
        chrono::Utc::now(),
    );
    app.state
        .store
        .set(key, &serde_json::to_string(&order).unwrap(), None)
        .await
        .unwrap();

    // Intent not attached yet: the provider is told to retry.
    let body = razorpay_event("payment.captured", "ORD-AWAITING", "pay_1");
    let response = app.razorpay_webhook("evt_1", &body).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert!(app
        .state
        .store
        .get("webhook:event:razorpay:evt_1")
        .await
        .unwrap()
        .is_none());

    order.status = OrderStatus::PaymentPending;
    app.state
        .store
        .set(key, &serde_json::to_string(&order).unwrap(), None)
        .await
        .unwrap();

    let response = app.razorpay_webhook("evt_1", &body).await;
    assert_eq!(read_json(response).await["outcome"], "applied");
    assert_eq!(app.order("ORD-AWAITING").await.status, OrderStatus::Paid);

    let response = app.razorpay_webhook("evt_1", &body).await;
    assert_eq!(read_json(response).await["outcome"], "duplicate");
}

#[tokio::test]
async fn failure_after_payment_does_not_unpay_the_order() {
    let app = TestApp::new().await;
    app.seed_product("P1", 10_000, 5).await;
    let order_id = app.checkout(&[("P1", 1)]).await.unwrap();

    let paid = razorpay_event("payment.captured", &order_id, "pay_1");
    app.razorpay_webhook("evt_paid", &paid).await;

    let failed = razorpay_event("payment.failed", &order_id, "pay_2");
    let response = app.razorpay_webhook("evt_failed", &failed).await;
    assert_eq!(read_json(response).await["outcome"], "ignored");

    assert_eq!(app.order(&order_id).await.status, OrderStatus::Paid);
    assert_eq!(app.on_hand("P1").await, 4);
    assert_eq!(app.available("P1").await, 4);
}

#[tokio::test]
async fn webhook_for_unconfigured_gateway_is_rejected() {
    let app = TestApp::new().await;
    let response = app
        .request(axum::http::Method::POST, "/webhook/stripe", None)
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
