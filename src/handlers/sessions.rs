//! Login, refresh and logout, shared by the three actor kinds.

use axum::{
    http::HeaderMap,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use validator::Validate;

use crate::auth::cookies::{clear_session_cookies, read_cookie, session_cookies};
use crate::auth::{ActorKind, AuthActor, AuthError};
use crate::errors::ServiceError;
use crate::handlers::common::{message_response, success_response, validate_input};
use crate::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email(message = "A valid email is required"))]
    pub email: String,
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: Option<String>,
}

pub async fn login_as(
    state: &AppState,
    kind: ActorKind,
    request: LoginRequest,
) -> Result<Response, ServiceError> {
    validate_input(&request)?;
    let session = state
        .services
        .identity
        .login(kind, &request.email, &request.password)
        .await?;
    let cookies = session_cookies(kind, &session.tokens, state.config.secure_cookies());
    Ok((cookies, success_response("Login successful", session)).into_response())
}

/// Body `refreshToken` wins over the cookie.
pub async fn refresh_as(
    state: &AppState,
    kind: ActorKind,
    headers: &HeaderMap,
    body: Option<Json<RefreshRequest>>,
) -> Result<Response, ServiceError> {
    let token = body
        .and_then(|Json(b)| b.refresh_token)
        .filter(|t| !t.is_empty())
        .or_else(|| read_cookie(headers, kind.refresh_cookie()))
        .ok_or(AuthError::MissingToken)?;

    let tokens = state.services.identity.refresh(kind, &token).await?;
    let cookies = session_cookies(kind, &tokens, state.config.secure_cookies());
    Ok((cookies, success_response("Token refreshed", tokens)).into_response())
}

pub async fn logout_as(state: &AppState, actor: &AuthActor) -> Result<Response, ServiceError> {
    state.services.identity.logout(actor).await?;
    let cookies = clear_session_cookies(actor.kind, state.config.secure_cookies());
    Ok((cookies, message_response("Logged out successfully")).into_response())
}
