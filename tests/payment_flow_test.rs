mod common;

use axum::http::{Method, StatusCode};
use common::{decimal, json_body, location, TestApp};
use rust_decimal_macros::dec;
use serde_json::json;
use storefront_api::entities::product::Category;
use uuid::Uuid;

/// Customer with two units of a 500 phone in the cart and an initiated payment.
async fn initiated(app: &TestApp, email: &str) -> (String, Uuid, String) {
    let (_, token) = app.customer(email).await;
    let product = app.product("Phone", Category::Smartphone, dec!(500), 5, 0).await;
    app.request(
        Method::POST,
        "/api/v1/cart",
        Some(json!({"productId": product, "quantity": 2})),
        Some(&token),
    )
    .await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/payment/init",
            Some(json!({"shippingAddress": "Mirpur 10, Dhaka", "phone": "01722222222"})),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    let tran_id = body["data"]["tranId"].as_str().unwrap().to_string();
    assert_eq!(
        body["data"]["url"],
        format!("https://gateway.test/pay/{}", tran_id)
    );
    (token, product, tran_id)
}

#[tokio::test]
async fn init_opens_a_session_without_touching_stock() {
    let app = TestApp::new().await;
    let (token, product, tran_id) = initiated(&app, "init@example.com").await;

    assert!(tran_id.starts_with("TXN-"));
    assert_eq!(app.stock_of(product).await, 5);

    let sent = app.gateway.last_init().unwrap();
    assert_eq!(sent.tran_id, tran_id);
    assert_eq!(sent.total_amount, dec!(1000));
    assert_eq!(sent.success_url, "http://api.test/api/v1/payment/success");
    assert_eq!(sent.ipn_url, "http://api.test/api/v1/payment/ipn");

    let status = app
        .request(
            Method::GET,
            &format!("/api/v1/payment/{}", tran_id),
            None,
            Some(&token),
        )
        .await;
    assert_eq!(status.status(), StatusCode::OK);
    let payment = json_body(status).await;
    assert_eq!(payment["data"]["status"], "initiated");
    assert_eq!(decimal(&payment["data"]["amount"]), dec!(1000));
    assert_eq!(payment["data"]["priceOverridden"], false);
}

#[tokio::test]
async fn init_checks_stock_and_flags_price_overrides() {
    let app = TestApp::new().await;
    let (_, token) = app.customer("override@example.com").await;
    let product = app.product("Speaker", Category::Accessories, dec!(200), 1, 0).await;

    let too_many = app
        .request(
            Method::POST,
            "/api/v1/payment/init",
            Some(json!({
                "items": [{"productId": product, "quantity": 2}],
                "shippingAddress": "Uttara, Dhaka",
                "phone": "01733333333"
            })),
            Some(&token),
        )
        .await;
    assert_eq!(too_many.status(), StatusCode::BAD_REQUEST);

    let response = app
        .request(
            Method::POST,
            "/api/v1/payment/init",
            Some(json!({
                "items": [{"productId": product, "quantity": 1, "price": "150"}],
                "shippingAddress": "Uttara, Dhaka",
                "phone": "01733333333"
            })),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let tran_id = json_body(response).await["data"]["tranId"]
        .as_str()
        .unwrap()
        .to_string();
    assert_eq!(app.gateway.last_init().unwrap().total_amount, dec!(150));

    let payment = json_body(
        app.request(
            Method::GET,
            &format!("/api/v1/payment/{}", tran_id),
            None,
            Some(&token),
        )
        .await,
    )
    .await;
    assert_eq!(payment["data"]["priceOverridden"], true);
}

#[tokio::test]
async fn init_rejects_amounts_out_of_range() {
    let app = TestApp::new().await;
    let (_, token) = app.customer("huge@example.com").await;
    let product = app.product("Tablet", Category::Tablet, dec!(300), 5, 0).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/payment/init",
            Some(json!({
                "items": [{
                    "productId": product,
                    "quantity": 2,
                    "price": "79228162514264337593543950335"
                }],
                "shippingAddress": "Gulshan, Dhaka",
                "phone": "01700000000"
            })),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(app.gateway.last_init().is_none());
    assert_eq!(app.stock_of(product).await, 5);
}

#[tokio::test]
async fn success_callback_materializes_a_paid_order_once() {
    let app = TestApp::new().await;
    let (token, product, tran_id) = initiated(&app, "paid@example.com").await;

    let fields = [("tran_id", tran_id.as_str()), ("val_id", "VAL-1"), ("status", "VALID")];
    let response = app.callback("/api/v1/payment/success", &fields).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    let target = location(&response);
    assert!(target.starts_with("http://shop.test/payment/success?"));
    assert!(target.contains(&format!("tran_id={}", tran_id)));

    assert_eq!(app.stock_of(product).await, 3);
    let orders = json_body(
        app.request(Method::GET, "/api/v1/orders/my-orders", None, Some(&token))
            .await,
    )
    .await;
    let orders = orders["data"].as_array().unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0]["paymentMethod"], "Online");
    assert_eq!(orders[0]["paymentStatus"], "Paid");
    assert_eq!(decimal(&orders[0]["totalAmount"]), dec!(1000));
    assert!(target.contains(&format!(
        "order_id={}",
        orders[0]["id"].as_str().unwrap()
    )));

    let cart = json_body(app.request(Method::GET, "/api/v1/cart", None, Some(&token)).await).await;
    assert!(cart["data"]["items"].as_array().unwrap().is_empty());

    // The IPN and a replayed redirect settle nothing new.
    let ipn = app.callback("/api/v1/payment/ipn", &fields).await;
    assert_eq!(ipn.status(), StatusCode::OK);
    let replay = app.callback("/api/v1/payment/success", &fields).await;
    assert_eq!(location(&replay), target);

    let orders = json_body(
        app.request(Method::GET, "/api/v1/orders/my-orders", None, Some(&token))
            .await,
    )
    .await;
    assert_eq!(orders["data"].as_array().unwrap().len(), 1);
    assert_eq!(app.stock_of(product).await, 3);

    let payment = json_body(
        app.request(
            Method::GET,
            &format!("/api/v1/payment/{}", tran_id),
            None,
            Some(&token),
        )
        .await,
    )
    .await;
    assert_eq!(payment["data"]["status"], "success");
    assert_eq!(payment["data"]["valId"], "VAL-1");
}

#[tokio::test]
async fn unknown_transaction_redirects_to_checkout() {
    let app = TestApp::new().await;
    let response = app
        .callback("/api/v1/payment/success", &[("tran_id", "TXN-0-missing")])
        .await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(
        location(&response),
        "http://shop.test/checkout?error=payment_not_found"
    );

    let empty = app.callback("/api/v1/payment/success", &[]).await;
    assert_eq!(
        location(&empty),
        "http://shop.test/checkout?error=payment_not_found"
    );
}

#[tokio::test]
async fn failed_validation_creates_no_order() {
    let app = TestApp::new().await;
    let (token, product, tran_id) = initiated(&app, "invalid@example.com").await;
    app.gateway.set_valid(false);

    let response = app
        .callback(
            "/api/v1/payment/success",
            &[("tran_id", tran_id.as_str()), ("val_id", "VAL-BAD")],
        )
        .await;
    assert_eq!(
        location(&response),
        "http://shop.test/checkout?error=validation_failed"
    );
    assert_eq!(app.stock_of(product).await, 5);

    let payment = json_body(
        app.request(
            Method::GET,
            &format!("/api/v1/payment/{}", tran_id),
            None,
            Some(&token),
        )
        .await,
    )
    .await;
    assert_eq!(payment["data"]["status"], "failed");
}

#[tokio::test]
async fn fail_and_cancel_redirect_with_outcome() {
    let app = TestApp::new().await;
    let (token, _, tran_id) = initiated(&app, "closed@example.com").await;

    let response = app
        .callback("/api/v1/payment/cancel", &[("tran_id", tran_id.as_str())])
        .await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(
        location(&response),
        format!("http://shop.test/checkout?payment=cancelled&tran_id={}", tran_id)
    );

    let payment = json_body(
        app.request(
            Method::GET,
            &format!("/api/v1/payment/{}", tran_id),
            None,
            Some(&token),
        )
        .await,
    )
    .await;
    assert_eq!(payment["data"]["status"], "cancelled");

    // A later success redirect cannot resurrect a closed payment.
    let late = app
        .callback(
            "/api/v1/payment/success",
            &[("tran_id", tran_id.as_str()), ("val_id", "VAL-2")],
        )
        .await;
    assert_eq!(
        location(&late),
        "http://shop.test/checkout?error=validation_failed"
    );

    // Nor can a late redirect that fails validation rewrite its outcome.
    app.gateway.set_valid(false);
    let rejected = app
        .callback(
            "/api/v1/payment/success",
            &[("tran_id", tran_id.as_str()), ("val_id", "VAL-3")],
        )
        .await;
    assert_eq!(
        location(&rejected),
        "http://shop.test/checkout?error=validation_failed"
    );
    let payment = json_body(
        app.request(
            Method::GET,
            &format!("/api/v1/payment/{}", tran_id),
            None,
            Some(&token),
        )
        .await,
    )
    .await;
    assert_eq!(payment["data"]["status"], "cancelled");

    let failed = app
        .callback("/api/v1/payment/fail", &[("tran_id", "TXN-1-unknown")])
        .await;
    assert_eq!(
        location(&failed),
        "http://shop.test/checkout?payment=failed&tran_id=TXN-1-unknown"
    );
}

#[tokio::test]
async fn ipn_requires_a_known_transaction() {
    let app = TestApp::new().await;
    let (_, _, tran_id) = initiated(&app, "ipn@example.com").await;

    let known = app
        .callback(
            "/api/v1/payment/ipn",
            &[("tran_id", tran_id.as_str()), ("status", "PENDING")],
        )
        .await;
    assert_eq!(known.status(), StatusCode::OK);
    assert_eq!(json_body(known).await["message"], "IPN received");

    let unknown = app
        .callback("/api/v1/payment/ipn", &[("tran_id", "TXN-2-nobody")])
        .await;
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn payment_status_is_owner_only() {
    let app = TestApp::new().await;
    let (_, _, tran_id) = initiated(&app, "mine@example.com").await;
    let (_, other) = app.customer("notmine@example.com").await;
    let (_, admin) = app.admin("audit@example.com").await;
    let uri = format!("/api/v1/payment/{}", tran_id);

    assert_eq!(
        app.request(Method::GET, &uri, None, Some(&other)).await.status(),
        StatusCode::FORBIDDEN
    );
    assert_eq!(
        app.request(Method::GET, &uri, None, Some(&admin)).await.status(),
        StatusCode::OK
    );
}

#[tokio::test]
async fn ipn_settles_when_the_browser_never_returns() {
    let app = TestApp::new().await;
    let (token, product, tran_id) = initiated(&app, "ipn-first@example.com").await;

    let fields = [("tran_id", tran_id.as_str()), ("val_id", "VAL-IPN"), ("status", "VALID")];
    let ipn = app.callback("/api/v1/payment/ipn", &fields).await;
    assert_eq!(ipn.status(), StatusCode::OK);

    let orders = json_body(
        app.request(Method::GET, "/api/v1/orders/my-orders", None, Some(&token))
            .await,
    )
    .await;
    let orders = orders["data"].as_array().unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0]["paymentMethod"], "Online");
    assert_eq!(orders[0]["paymentStatus"], "Paid");
    assert_eq!(app.stock_of(product).await, 3);
    let order_id = orders[0]["id"].as_str().unwrap().to_string();

    let late = app.callback("/api/v1/payment/success", &fields).await;
    assert!(location(&late).contains(&format!("order_id={}", order_id)));

    let orders = json_body(
        app.request(Method::GET, "/api/v1/orders/my-orders", None, Some(&token))
            .await,
    )
    .await;
    assert_eq!(orders["data"].as_array().unwrap().len(), 1);
    assert_eq!(app.stock_of(product).await, 3);
}
