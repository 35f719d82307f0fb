use axum::{
    extract::State,
    http::HeaderMap,
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use validator::Validate;

use crate::auth::{ActorKind, AuthActor, AuthRouterExt};
use crate::errors::ServiceError;
use crate::handlers::common::{
    created_response, message_response, success_response, validate_input, JsonBody,
};
use crate::handlers::sessions::{self, LoginRequest, RefreshRequest};
use crate::services::identity::{CustomerChanges, NewCustomer};
use crate::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(length(min = 1, max = 100, message = "Name is required"))]
    pub name: String,
    #[validate(email(message = "A valid email is required"))]
    pub email: String,
    #[validate(length(min = 6, message = "Password must be at least 6 characters"))]
    pub password: String,
    pub phone: Option<String>,
    pub address: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateProfileRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,
    #[validate(length(max = 20))]
    pub phone: Option<String>,
    #[validate(length(max = 500))]
    pub address: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    #[validate(length(min = 1, message = "Current password is required"))]
    pub old_password: String,
    #[validate(length(min = 6, message = "Password must be at least 6 characters"))]
    pub new_password: String,
}

/// Customer identity routes, mounted at `/users`.
pub fn routes() -> Router<AppState> {
    let public = Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/refresh-token", post(refresh_token));

    let protected = Router::new()
        .route("/logout", post(logout))
        .route("/profile", get(profile).patch(update_profile))
        .route("/change-password", post(change_password))
        .with_actor(&[ActorKind::Customer]);

    public.merge(protected)
}

async fn register(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<RegisterRequest>,
) -> Result<Response, ServiceError> {
    validate_input(&payload)?;
    let user = state
        .services
        .identity
        .register_customer(NewCustomer {
            name: payload.name,
            email: payload.email,
            password: payload.password,
            phone: payload.phone,
            address: payload.address,
        })
        .await?;
    Ok(created_response("User registered successfully", user))
}

async fn login(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<LoginRequest>,
) -> Result<Response, ServiceError> {
    sessions::login_as(&state, ActorKind::Customer, payload).await
}

async fn refresh_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<RefreshRequest>>,
) -> Result<Response, ServiceError> {
    sessions::refresh_as(&state, ActorKind::Customer, &headers, body).await
}

async fn logout(State(state): State<AppState>, actor: AuthActor) -> Result<Response, ServiceError> {
    sessions::logout_as(&state, &actor).await
}

async fn profile(State(state): State<AppState>, actor: AuthActor) -> Result<Response, ServiceError> {
    let profile = state.services.identity.profile(&actor).await?;
    Ok(success_response("Profile fetched successfully", profile))
}

async fn update_profile(
    State(state): State<AppState>,
    actor: AuthActor,
    JsonBody(payload): JsonBody<UpdateProfileRequest>,
) -> Result<Response, ServiceError> {
    validate_input(&payload)?;
    let user = state
        .services
        .identity
        .update_customer(
            actor.id,
            CustomerChanges {
                name: payload.name,
                phone: payload.phone,
                address: payload.address,
            },
        )
        .await?;
    Ok(success_response("Profile updated successfully", user))
}

async fn change_password(
    State(state): State<AppState>,
    actor: AuthActor,
    JsonBody(payload): JsonBody<ChangePasswordRequest>,
) -> Result<Response, ServiceError> {
    validate_input(&payload)?;
    state
        .services
        .identity
        .change_password(actor.id, &payload.old_password, &payload.new_password)
        .await?;
    Ok(message_response("Password changed successfully"))
}
