mod common;

use axum::http::{Method, StatusCode};
use common::{decimal, json_body, multipart_body, multipart_request, TestApp};
use futures::future::join_all;
use rust_decimal_macros::dec;
use serde_json::json;
use storefront_api::entities::product::Category;

fn shipping() -> serde_json::Value {
    json!({"shippingAddress": "Road 5, Dhanmondi, Dhaka", "phone": "01711111111"})
}

#[tokio::test]
async fn checkout_from_cart_reserves_stock_and_empties_cart() {
    let app = TestApp::new().await;
    let (user_id, token) = app.customer("buyer@example.com").await;
    let phone = app.product("Phone", Category::Smartphone, dec!(1000), 5, 10).await;
    let case = app.product("Case", Category::Accessories, dec!(50), 10, 0).await;

    for (product, quantity) in [(phone, 2), (case, 1)] {
        app.request(
            Method::POST,
            "/api/v1/cart",
            Some(json!({"productId": product, "quantity": quantity})),
            Some(&token),
        )
        .await;
    }

    let response = app
        .request(Method::POST, "/api/v1/orders", Some(shipping()), Some(&token))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let order = json_body(response).await;
    assert_eq!(order["data"]["userId"], user_id.to_string());
    assert_eq!(order["data"]["status"], "Pending");
    assert_eq!(order["data"]["paymentMethod"], "COD");
    assert_eq!(order["data"]["paymentStatus"], "Pending");
    // 2 * 900 + 50
    assert_eq!(decimal(&order["data"]["totalAmount"]), dec!(1850));
    assert_eq!(order["data"]["items"].as_array().unwrap().len(), 2);

    assert_eq!(app.stock_of(phone).await, 3);
    assert_eq!(app.stock_of(case).await, 9);

    let cart = json_body(app.request(Method::GET, "/api/v1/cart", None, Some(&token)).await).await;
    assert!(cart["data"]["items"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn explicit_items_bypass_the_cart() {
    let app = TestApp::new().await;
    let (_, token) = app.customer("direct@example.com").await;
    let tv = app.product("TV", Category::Television, dec!(40000), 4, 0).await;
    let cable = app.product("HDMI", Category::Accessories, dec!(300), 10, 0).await;

    app.request(
        Method::POST,
        "/api/v1/cart",
        Some(json!({"productId": cable, "quantity": 1})),
        Some(&token),
    )
    .await;

    let mut body = shipping();
    body["items"] = json!([{"productId": tv, "quantity": 1}]);
    let response = app
        .request(Method::POST, "/api/v1/orders", Some(body), Some(&token))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(app.stock_of(tv).await, 3);
    assert_eq!(app.stock_of(cable).await, 10);
}

#[tokio::test]
async fn insufficient_stock_rolls_back_every_line() {
    let app = TestApp::new().await;
    let (_, token) = app.customer("rollback@example.com").await;
    let plenty = app.product("Mouse", Category::Accessories, dec!(20), 10, 0).await;
    let scarce = app.product("GPU", Category::Gaming, dec!(900), 1, 0).await;

    let mut body = shipping();
    body["items"] = json!([
        {"productId": plenty, "quantity": 3},
        {"productId": scarce, "quantity": 2}
    ]);
    let response = app
        .request(Method::POST, "/api/v1/orders", Some(body), Some(&token))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(app.stock_of(plenty).await, 10);
    assert_eq!(app.stock_of(scarce).await, 1);

    let mine = json_body(
        app.request(Method::GET, "/api/v1/orders/my-orders", None, Some(&token))
            .await,
    )
    .await;
    assert!(mine["data"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn empty_cart_cannot_check_out() {
    let app = TestApp::new().await;
    let (_, token) = app.customer("empty@example.com").await;

    let response = app
        .request(Method::POST, "/api/v1/orders", Some(shipping()), Some(&token))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let mut body = shipping();
    body["items"] = json!([{"productId": uuid::Uuid::new_v4(), "quantity": 0}]);
    let response = app
        .request(Method::POST, "/api/v1/orders", Some(body), Some(&token))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn cancel_restores_stock_once() {
    let app = TestApp::new().await;
    let (_, token) = app.customer("undo@example.com").await;
    let laptop = app.product("Laptop", Category::Laptop, dec!(70000), 3, 0).await;

    let mut body = shipping();
    body["items"] = json!([{"productId": laptop, "quantity": 2}]);
    let order = json_body(
        app.request(Method::POST, "/api/v1/orders", Some(body), Some(&token))
            .await,
    )
    .await;
    let order_id = order["data"]["id"].as_str().unwrap().to_string();
    assert_eq!(app.stock_of(laptop).await, 1);

    let cancel_uri = format!("/api/v1/orders/{}/cancel", order_id);
    let cancelled = app
        .request(Method::PATCH, &cancel_uri, None, Some(&token))
        .await;
    assert_eq!(cancelled.status(), StatusCode::OK);
    assert_eq!(json_body(cancelled).await["data"]["status"], "Cancelled");
    assert_eq!(app.stock_of(laptop).await, 3);

    let again = app
        .request(Method::PATCH, &cancel_uri, None, Some(&token))
        .await;
    assert_eq!(again.status(), StatusCode::BAD_REQUEST);
    assert_eq!(app.stock_of(laptop).await, 3);
}

#[tokio::test]
async fn orders_are_private_to_their_owner() {
    let app = TestApp::new().await;
    let (_, owner) = app.customer("owner@example.com").await;
    let (_, stranger) = app.customer("stranger@example.com").await;
    let (_, admin) = app.admin("viewer@example.com").await;
    let product = app.product("Tablet", Category::Tablet, dec!(300), 5, 0).await;

    let mut body = shipping();
    body["items"] = json!([{"productId": product, "quantity": 1}]);
    let order = json_body(
        app.request(Method::POST, "/api/v1/orders", Some(body), Some(&owner))
            .await,
    )
    .await;
    let uri = format!("/api/v1/orders/{}", order["data"]["id"].as_str().unwrap());

    assert_eq!(
        app.request(Method::GET, &uri, None, Some(&owner)).await.status(),
        StatusCode::OK
    );
    assert_eq!(
        app.request(Method::GET, &uri, None, Some(&stranger)).await.status(),
        StatusCode::FORBIDDEN
    );
    assert_eq!(
        app.request(Method::GET, &uri, None, Some(&admin)).await.status(),
        StatusCode::OK
    );

    let cancel = app
        .request(Method::PATCH, &format!("{}/cancel", uri), None, Some(&stranger))
        .await;
    assert_eq!(cancel.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn admin_lists_and_updates_orders() {
    let app = TestApp::new().await;
    let (_, customer) = app.customer("many@example.com").await;
    let (_, admin) = app.admin("boss-orders@example.com").await;
    let product = app.product("Buds", Category::Headphone, dec!(100), 20, 0).await;

    let mut ids = Vec::new();
    for _ in 0..3 {
        let mut body = shipping();
        body["items"] = json!([{"productId": product, "quantity": 1}]);
        let order = json_body(
            app.request(Method::POST, "/api/v1/orders", Some(body), Some(&customer))
                .await,
        )
        .await;
        ids.push(order["data"]["id"].as_str().unwrap().to_string());
    }

    let updated = app
        .request(
            Method::PATCH,
            &format!("/api/v1/orders/{}/status", ids[0]),
            Some(json!({"status": "Out for Delivery"})),
            Some(&admin),
        )
        .await;
    assert_eq!(updated.status(), StatusCode::OK);
    assert_eq!(json_body(updated).await["data"]["status"], "Out for Delivery");

    let page = json_body(
        app.request(Method::GET, "/api/v1/orders/all?page=1&limit=2", None, Some(&admin))
            .await,
    )
    .await;
    assert_eq!(page["data"]["total"], 3);
    assert_eq!(page["data"]["orders"].as_array().unwrap().len(), 2);

    let pending = json_body(
        app.request(Method::GET, "/api/v1/orders/all?status=Pending", None, Some(&admin))
            .await,
    )
    .await;
    assert_eq!(pending["data"]["total"], 2);

    let forbidden = app
        .request(Method::GET, "/api/v1/orders/all", None, Some(&customer))
        .await;
    assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);

    let bad_status = app
        .request(
            Method::PATCH,
            &format!("/api/v1/orders/{}/status", ids[1]),
            Some(json!({"status": "Lost"})),
            Some(&admin),
        )
        .await;
    assert!(bad_status.status().is_client_error());
}

#[tokio::test]
async fn concurrent_checkouts_never_oversell() {
    let app = TestApp::new().await;
    let console = app.product("PS5", Category::Gaming, dec!(60000), 3, 0).await;

    let mut tokens = Vec::new();
    for n in 0..6 {
        let (_, token) = app.customer(&format!("rush{}@example.com", n)).await;
        tokens.push(token);
    }

    let attempts = tokens.iter().map(|token| {
        let mut body = shipping();
        body["items"] = json!([{"productId": console, "quantity": 1}]);
        app.request(Method::POST, "/api/v1/orders", Some(body), Some(token.as_str()))
    });
    let statuses: Vec<StatusCode> = join_all(attempts)
        .await
        .into_iter()
        .map(|response| response.status())
        .collect();

    let placed = statuses.iter().filter(|s| **s == StatusCode::CREATED).count();
    let refused = statuses.iter().filter(|s| **s == StatusCode::BAD_REQUEST).count();
    assert_eq!(placed, 3);
    assert_eq!(refused, 3);
    assert_eq!(app.stock_of(console).await, 0);
}

#[tokio::test]
async fn orders_keep_their_price_snapshot() {
    let app = TestApp::new().await;
    let (_, token) = app.customer("snapshot@example.com").await;
    let (_, admin) = app.admin("pricing@example.com").await;
    let lens = app.product("Prime Lens", Category::Camera, dec!(1000), 5, 0).await;

    let mut body = shipping();
    body["items"] = json!([{"productId": lens, "quantity": 2}]);
    let order = json_body(
        app.request(Method::POST, "/api/v1/orders", Some(body), Some(&token))
            .await,
    )
    .await;
    let uri = format!("/api/v1/orders/{}", order["data"]["id"].as_str().unwrap());

    let repriced = app
        .send(multipart_request(
            Method::PATCH,
            &format!("/api/v1/products/{}", lens),
            &admin,
            multipart_body(&[("price", "5000")], None),
        ))
        .await;
    assert_eq!(repriced.status(), StatusCode::OK);

    let fetched = json_body(app.request(Method::GET, &uri, None, Some(&token)).await).await;
    assert_eq!(decimal(&fetched["data"]["totalAmount"]), dec!(2000));
    assert_eq!(decimal(&fetched["data"]["items"][0]["unitPrice"]), dec!(1000));
}
