//! Session lifecycle across the three actor kinds.

mod common;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
};
use common::{json_body, TestApp, ADMIN_KEY, PASSWORD};
use serde_json::json;

#[tokio::test]
async fn customer_register_login_profile() {
    let app = TestApp::new().await;
    let (id, token) = app.customer("rahim@example.com").await;

    let response = app
        .request(Method::GET, "/api/v1/users/profile", None, Some(&token))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["statusCode"], 200);
    assert_eq!(body["data"]["id"], id.to_string());
    assert_eq!(body["data"]["email"], "rahim@example.com");
    assert!(body["data"].get("passwordHash").is_none());
}

#[tokio::test]
async fn duplicate_registration_conflicts() {
    let app = TestApp::new().await;
    app.customer("dup@example.com").await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/users/register",
            Some(json!({"name": "Again", "email": "DUP@example.com", "password": PASSWORD})),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = json_body(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["statusCode"], 409);
}

#[tokio::test]
async fn short_password_is_rejected() {
    let app = TestApp::new().await;
    let response = app
        .request(
            Method::POST,
            "/api/v1/users/register",
            Some(json!({"name": "Short", "email": "short@example.com", "password": "12345"})),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn wrong_password_is_unauthorized() {
    let app = TestApp::new().await;
    app.customer("karim@example.com").await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/users/login",
            Some(json!({"email": "karim@example.com", "password": "not-the-password"})),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn login_sets_session_cookies() {
    let app = TestApp::new().await;
    app.customer("cookie@example.com").await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/users/login",
            Some(json!({"email": "cookie@example.com", "password": PASSWORD})),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let cookies: Vec<String> = response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok().map(str::to_string))
        .collect();
    assert_eq!(cookies.len(), 2);
    assert!(cookies.iter().all(|c| c.contains("HttpOnly")));
}

#[tokio::test]
async fn refresh_rotates_and_rejects_reuse() {
    let app = TestApp::new().await;
    app.customer("rotate@example.com").await;

    let login = app
        .request(
            Method::POST,
            "/api/v1/users/login",
            Some(json!({"email": "rotate@example.com", "password": PASSWORD})),
            None,
        )
        .await;
    let refresh_token = json_body(login).await["data"]["refreshToken"]
        .as_str()
        .unwrap()
        .to_string();

    let first = app
        .request(
            Method::POST,
            "/api/v1/users/refresh-token",
            Some(json!({"refreshToken": refresh_token})),
            None,
        )
        .await;
    assert_eq!(first.status(), StatusCode::OK);
    let rotated = json_body(first).await;
    assert!(rotated["data"]["accessToken"].as_str().is_some());
    assert_ne!(rotated["data"]["refreshToken"], refresh_token);

    let reused = app
        .request(
            Method::POST,
            "/api/v1/users/refresh-token",
            Some(json!({"refreshToken": refresh_token})),
            None,
        )
        .await;
    assert_eq!(reused.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn refresh_reads_the_cookie() {
    let app = TestApp::new().await;
    app.customer("jar@example.com").await;

    let login = app
        .request(
            Method::POST,
            "/api/v1/users/login",
            Some(json!({"email": "jar@example.com", "password": PASSWORD})),
            None,
        )
        .await;
    let refresh_token = json_body(login).await["data"]["refreshToken"]
        .as_str()
        .unwrap()
        .to_string();

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/users/refresh-token")
        .header(header::COOKIE, format!("refreshToken={}", refresh_token))
        .body(Body::empty())
        .unwrap();
    let response = app.send(request).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn logout_revokes_the_access_token() {
    let app = TestApp::new().await;
    let (_, token) = app.customer("bye@example.com").await;

    let response = app
        .request(Method::POST, "/api/v1/users/logout", None, Some(&token))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let after = app
        .request(Method::GET, "/api/v1/users/profile", None, Some(&token))
        .await;
    assert_eq!(after.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn change_password_requires_the_old_one() {
    let app = TestApp::new().await;
    let (_, token) = app.customer("pw@example.com").await;

    let wrong = app
        .request(
            Method::POST,
            "/api/v1/users/change-password",
            Some(json!({"oldPassword": "guess-again", "newPassword": "newsecret1"})),
            Some(&token),
        )
        .await;
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

    let right = app
        .request(
            Method::POST,
            "/api/v1/users/change-password",
            Some(json!({"oldPassword": PASSWORD, "newPassword": "newsecret1"})),
            Some(&token),
        )
        .await;
    assert_eq!(right.status(), StatusCode::OK);

    let relogin = app
        .request(
            Method::POST,
            "/api/v1/users/login",
            Some(json!({"email": "pw@example.com", "password": "newsecret1"})),
            None,
        )
        .await;
    assert_eq!(relogin.status(), StatusCode::OK);
}

#[tokio::test]
async fn profile_update_keeps_unset_fields() {
    let app = TestApp::new().await;
    let (_, token) = app.customer("edit@example.com").await;

    let response = app
        .request(
            Method::PATCH,
            "/api/v1/users/profile",
            Some(json!({"phone": "01911111111"})),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["data"]["phone"], "01911111111");
    assert_eq!(body["data"]["name"], "Test Customer");
}

#[tokio::test]
async fn admin_registration_needs_the_key() {
    let app = TestApp::new().await;

    let missing = app
        .request(
            Method::POST,
            "/api/v1/admin/register",
            Some(json!({"name": "Nope", "email": "nope@example.com", "password": PASSWORD})),
            None,
        )
        .await;
    assert_eq!(missing.status(), StatusCode::FORBIDDEN);

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/admin/register")
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-admin-key", ADMIN_KEY)
        .body(Body::from(
            json!({"name": "Boss", "email": "boss@example.com", "password": PASSWORD}).to_string(),
        ))
        .unwrap();
    assert_eq!(app.send(request).await.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn tokens_are_scoped_to_their_actor_kind() {
    let app = TestApp::new().await;
    let (_, customer) = app.customer("scoped@example.com").await;
    let (_, admin) = app.admin("scoped-admin@example.com").await;

    let response = app
        .request(Method::GET, "/api/v1/admin/deliverymen", None, Some(&customer))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .request(Method::GET, "/api/v1/cart", None, Some(&admin))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app.request(Method::GET, "/api/v1/cart", None, None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn deactivated_agent_cannot_log_in() {
    let app = TestApp::new().await;
    let (agent_id, token) = app.deliveryman("rider@example.com").await;
    let (_, admin) = app.admin("ops@example.com").await;

    let toggled = app
        .request(
            Method::PATCH,
            &format!("/api/v1/admin/deliverymen/{}/toggle-active", agent_id),
            None,
            Some(&admin),
        )
        .await;
    assert_eq!(toggled.status(), StatusCode::OK);
    assert_eq!(json_body(toggled).await["data"]["isActive"], false);

    let profile = app
        .request(Method::GET, "/api/v1/deliveryman/profile", None, Some(&token))
        .await;
    assert_eq!(profile.status(), StatusCode::FORBIDDEN);

    let login = app
        .request(
            Method::POST,
            "/api/v1/deliveryman/login",
            Some(json!({"email": "rider@example.com", "password": PASSWORD})),
            None,
        )
        .await;
    assert_eq!(login.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn responses_echo_a_request_id() {
    let app = TestApp::new().await;
    let response = app.request(Method::GET, "/health", None, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
}
