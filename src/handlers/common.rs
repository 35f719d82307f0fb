use axum::{
    async_trait,
    extract::{
        rejection::{JsonRejection, QueryRejection},
        FromRequest, FromRequestParts, Query, Request,
    },
    http::{header, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use validator::Validate;

use crate::errors::ServiceError;
use crate::ApiResponse;

/// Standard success response
pub fn success_response<T: Serialize>(message: impl Into<String>, data: T) -> Response {
    ApiResponse::new(StatusCode::OK, message, Some(data)).into_response()
}

/// Standard created response
pub fn created_response<T: Serialize>(message: impl Into<String>, data: T) -> Response {
    ApiResponse::new(StatusCode::CREATED, message, Some(data)).into_response()
}

/// Success envelope without a payload
pub fn message_response(message: impl Into<String>) -> Response {
    ApiResponse::<()>::new(StatusCode::OK, message, None).into_response()
}

/// Browser redirect used by the gateway callbacks
pub fn redirect_response(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

/// Validate request input
pub fn validate_input<T: Validate>(input: &T) -> Result<(), ServiceError> {
    input.validate().map_err(ServiceError::from)
}

/// `Json` extractor whose rejection renders the standard error envelope.
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
{
    type Rejection = ServiceError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e| ServiceError::BadRequest(e.body_text()))?;
        Ok(Self(value))
    }
}

/// `Query` extractor whose rejection renders the standard error envelope.
pub struct QueryParams<T>(pub T);

#[async_trait]
impl<T, S> FromRequestParts<S> for QueryParams<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state)
            .await
            .map_err(|e: QueryRejection| ServiceError::BadRequest(e.body_text()))?;
        Ok(Self(value))
    }
}

/// Pagination parameters for list operations
#[derive(Debug, Deserialize, Serialize)]
pub struct PaginationParams {
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_limit")]
    pub limit: u64,
}

fn default_page() -> u64 {
    1
}

fn default_limit() -> u64 {
    20
}

impl Default for PaginationParams {
    fn default() -> Self {
        Self {
            page: default_page(),
            limit: default_limit(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Validate)]
    struct Probe {
        #[validate(length(min = 1, message = "name is required"))]
        name: String,
    }

    #[test]
    fn validation_failures_map_to_validation_errors() {
        let err = validate_input(&Probe { name: String::new() }).unwrap_err();
        assert!(matches!(err, ServiceError::ValidationError(msg) if msg.contains("name is required")));
        assert!(validate_input(&Probe { name: "x".into() }).is_ok());
    }

    #[test]
    fn redirect_sets_location() {
        let response = redirect_response("http://shop.test/checkout?error=payment_not_found");
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.headers()[header::LOCATION],
            "http://shop.test/checkout?error=payment_not_found"
        );
    }
}
