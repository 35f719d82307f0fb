//! Storefront API Library
//!
//! Backend for an electronics storefront: product catalog, carts, direct and
//! gateway-paid checkout, delivery dispatch with agent self-service, revenue
//! reporting and a rule-based shopping assistant.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod middleware_helpers;
pub mod migrator;
pub mod services;
pub mod tracing;

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Extension, Router,
};
use serde::Serialize;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    services::ServeDir,
};

use crate::auth::SessionService;
use crate::config::{AppConfig, AppConfigError};
use crate::db::DbPool;
use crate::events::EventSender;

/// Multipart framing on top of the image itself
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DbPool>,
    pub config: Arc<AppConfig>,
    pub event_sender: Arc<EventSender>,
    pub sessions: Arc<SessionService>,
    pub services: handlers::AppServices,
}

/// Success envelope shared by every JSON endpoint
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub success: bool,
    pub status_code: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn new(status: StatusCode, message: impl Into<String>, data: Option<T>) -> Self {
        Self {
            success: status.is_success(),
            status_code: status.as_u16(),
            message: message.into(),
            data,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::OK);
        (status, Json(self)).into_response()
    }
}

/// Every versioned route; mounted under `/api/v1`.
pub fn api_v1_routes() -> Router<AppState> {
    Router::new()
        .nest("/users", handlers::users::routes())
        .nest("/admin", handlers::admin::routes())
        .nest("/deliveryman", handlers::deliveryman::routes())
        .nest("/products", handlers::products::routes())
        .nest("/cart", handlers::cart::routes())
        .nest("/orders", handlers::orders::routes())
        .nest("/payment", handlers::payments::routes())
        .nest("/chat", handlers::chat::routes())
}

/// Builds the CORS layer. Explicit origins allow credentials; the permissive
/// fallback only applies in development or when opted into.
pub fn cors_layer(cfg: &AppConfig) -> Result<CorsLayer, AppConfigError> {
    let configured_origins: Option<Vec<HeaderValue>> = cfg
        .cors_allowed_origins
        .as_ref()
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .filter_map(|origin| HeaderValue::from_str(origin).ok())
                .collect::<Vec<_>>()
        })
        .filter(|origins| !origins.is_empty());

    if let Some(origins) = configured_origins {
        return Ok(CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([
                http::Method::GET,
                http::Method::POST,
                http::Method::PATCH,
                http::Method::PUT,
                http::Method::DELETE,
                http::Method::OPTIONS,
            ])
            .allow_headers([
                http::header::CONTENT_TYPE,
                http::header::AUTHORIZATION,
                http::header::HeaderName::from_static("x-admin-key"),
                http::header::HeaderName::from_static(crate::tracing::REQUEST_ID_HEADER),
            ])
            .allow_credentials(cfg.cors_allow_credentials));
    }

    if cfg.should_allow_permissive_cors() {
        ::tracing::info!(
            development = cfg.is_development(),
            "using permissive CORS because explicit origins were not configured"
        );
        return Ok(CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any));
    }

    let mut errors = validator::ValidationErrors::new();
    let mut err = validator::ValidationError::new("cors_allowed_origins_required");
    err.message = Some(
        "Set APP__CORS_ALLOWED_ORIGINS or APP__CORS_ALLOW_ANY_ORIGIN=true".into(),
    );
    errors.add("cors_allowed_origins", err);
    Err(AppConfigError::Validation(errors))
}

/// Full application router: versioned API, health probes, uploaded images,
/// and the shared middleware stack.
pub fn build_router(state: AppState, cors: CorsLayer) -> Router {
    let uploads = ServeDir::new(&state.config.upload_dir);
    let body_limit = state.config.max_upload_bytes + MULTIPART_OVERHEAD_BYTES;
    let sessions = state.sessions.clone();

    Router::<AppState>::new()
        .route("/", get(|| async { "storefront-api up" }))
        .nest("/health", handlers::health::health_routes())
        .nest("/api/v1", api_v1_routes())
        .nest_service("/uploads", uploads)
        .layer(DefaultBodyLimit::max(body_limit))
        // HTTP tracing layer for consistent request/response telemetry
        .layer(crate::tracing::configure_http_tracing())
        .layer(CompressionLayer::new())
        .layer(cors)
        // Auth guards look the session service up in request extensions
        .layer(Extension(sessions))
        // Ensure every request carries a request id for traceability
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id::request_id_middleware,
        ))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn envelope_carries_status_and_message() {
        let response = ApiResponse::new(StatusCode::CREATED, "made", Some(7)).into_response();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["statusCode"], 201);
        assert_eq!(json["message"], "made");
        assert_eq!(json["data"], 7);
    }

    #[tokio::test]
    async fn empty_envelope_omits_data() {
        let response = ApiResponse::<()>::new(StatusCode::OK, "done", None).into_response();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(json.get("data").is_none());
    }

    #[test]
    fn production_without_origins_is_rejected() {
        let cfg = AppConfig::new(
            "sqlite::memory:".into(),
            "a-production-access-secret-with-enough-entropy-91".into(),
            "a-production-refresh-secret-with-enough-entropy-37".into(),
            "127.0.0.1".into(),
            8080,
            "production".into(),
            "https://shop.example.com".into(),
            "https://api.example.com".into(),
        );
        assert!(cors_layer(&cfg).is_err());
    }
}
