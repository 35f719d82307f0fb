use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::Response,
    routing::{get, patch, post},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::auth::{ActorKind, AuthActor, AuthRouterExt};
use crate::errors::ServiceError;
use crate::handlers::common::{
    created_response, message_response, success_response, validate_input, JsonBody, QueryParams,
};
use crate::handlers::sessions::{self, LoginRequest, RefreshRequest};
use crate::services::delivery::{AgentChanges, AgentFilter, NewAgent};
use crate::services::identity::NewAdmin;
use crate::AppState;

const ADMIN_KEY_HEADER: &str = "x-admin-key";

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterAdminRequest {
    #[validate(length(min = 1, max = 100, message = "Name is required"))]
    pub name: String,
    #[validate(email(message = "A valid email is required"))]
    pub email: String,
    #[validate(length(min = 6, message = "Password must be at least 6 characters"))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateDeliverymanRequest {
    #[validate(length(min = 1, max = 100, message = "Name is required"))]
    pub name: String,
    #[validate(email(message = "A valid email is required"))]
    pub email: String,
    #[validate(length(min = 1, max = 20, message = "Phone is required"))]
    pub phone: String,
    #[validate(length(min = 6, message = "Password must be at least 6 characters"))]
    pub password: String,
    pub vehicle_type: Option<String>,
    pub vehicle_number: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDeliverymanRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,
    #[validate(length(min = 1, max = 20))]
    pub phone: Option<String>,
    pub vehicle_type: Option<String>,
    pub vehicle_number: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct DeliverymanQuery {
    pub active: Option<bool>,
    pub available: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignOrderRequest {
    pub order_id: Uuid,
    pub deliveryman_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct RevenueQuery {
    pub year: Option<i32>,
    pub month: Option<u32>,
}

/// Admin auth and back-office routes, mounted at `/admin`.
pub fn routes() -> Router<AppState> {
    let public = Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/refresh-token", post(refresh_token));

    let protected = Router::new()
        .route("/logout", post(logout))
        .route("/profile", get(profile))
        .route("/deliverymen", post(create_deliveryman).get(list_deliverymen))
        .route(
            "/deliverymen/:id",
            get(get_deliveryman)
                .patch(update_deliveryman)
                .delete(delete_deliveryman),
        )
        .route("/deliverymen/:id/toggle-active", patch(toggle_deliveryman))
        .route("/assign-order", post(assign_order))
        .route("/revenue", get(revenue))
        .with_actor(&[ActorKind::Admin]);

    public.merge(protected)
}

async fn register(
    State(state): State<AppState>,
    headers: HeaderMap,
    JsonBody(payload): JsonBody<RegisterAdminRequest>,
) -> Result<Response, ServiceError> {
    validate_input(&payload)?;
    let presented_key = headers
        .get(ADMIN_KEY_HEADER)
        .and_then(|value| value.to_str().ok());
    let admin = state
        .services
        .identity
        .register_admin(
            presented_key,
            NewAdmin {
                name: payload.name,
                email: payload.email,
                password: payload.password,
            },
        )
        .await?;
    Ok(created_response("Admin registered successfully", admin))
}

async fn login(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<LoginRequest>,
) -> Result<Response, ServiceError> {
    sessions::login_as(&state, ActorKind::Admin, payload).await
}

async fn refresh_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<RefreshRequest>>,
) -> Result<Response, ServiceError> {
    sessions::refresh_as(&state, ActorKind::Admin, &headers, body).await
}

async fn logout(State(state): State<AppState>, actor: AuthActor) -> Result<Response, ServiceError> {
    sessions::logout_as(&state, &actor).await
}

async fn profile(State(state): State<AppState>, actor: AuthActor) -> Result<Response, ServiceError> {
    let profile = state.services.identity.profile(&actor).await?;
    Ok(success_response("Profile fetched successfully", profile))
}

// Delivery agents

async fn create_deliveryman(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<CreateDeliverymanRequest>,
) -> Result<Response, ServiceError> {
    validate_input(&payload)?;
    let agent = state
        .services
        .delivery
        .create_agent(NewAgent {
            name: payload.name,
            email: payload.email,
            phone: payload.phone,
            password: payload.password,
            vehicle_type: payload.vehicle_type,
            vehicle_number: payload.vehicle_number,
        })
        .await?;
    Ok(created_response("Deliveryman created successfully", agent))
}

async fn list_deliverymen(
    State(state): State<AppState>,
    QueryParams(query): QueryParams<DeliverymanQuery>,
) -> Result<Response, ServiceError> {
    let agents = state
        .services
        .delivery
        .list_agents(AgentFilter {
            active: query.active,
            available: query.available,
        })
        .await?;
    Ok(success_response("Deliverymen fetched successfully", agents))
}

async fn get_deliveryman(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    let agent = state.services.delivery.agent(id).await?;
    Ok(success_response("Deliveryman fetched successfully", agent))
}

async fn update_deliveryman(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    JsonBody(payload): JsonBody<UpdateDeliverymanRequest>,
) -> Result<Response, ServiceError> {
    validate_input(&payload)?;
    let agent = state
        .services
        .delivery
        .update_agent(
            id,
            AgentChanges {
                name: payload.name,
                phone: payload.phone,
                vehicle_type: payload.vehicle_type,
                vehicle_number: payload.vehicle_number,
                is_active: payload.is_active,
                ..Default::default()
            },
        )
        .await?;
    Ok(success_response("Deliveryman updated successfully", agent))
}

async fn toggle_deliveryman(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    let agent = state.services.delivery.toggle_active(id).await?;
    let message = if agent.is_active {
        "Deliveryman activated"
    } else {
        "Deliveryman deactivated"
    };
    Ok(success_response(message, agent))
}

async fn delete_deliveryman(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    state.services.delivery.delete_agent(id).await?;
    Ok(message_response("Deliveryman deleted successfully"))
}

async fn assign_order(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<AssignOrderRequest>,
) -> Result<Response, ServiceError> {
    let order = state
        .services
        .delivery
        .assign(payload.order_id, payload.deliveryman_id)
        .await?;
    Ok(success_response("Order assigned successfully", order))
}

async fn revenue(
    State(state): State<AppState>,
    QueryParams(query): QueryParams<RevenueQuery>,
) -> Result<Response, ServiceError> {
    let report = state
        .services
        .revenue
        .report(query.year, query.month)
        .await?;
    Ok(success_response("Revenue report generated", report))
}
