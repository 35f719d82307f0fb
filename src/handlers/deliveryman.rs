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
use crate::entities::order::{DeliveryDecision, OrderStatus};
use crate::errors::ServiceError;
use crate::handlers::common::{success_response, validate_input, JsonBody, QueryParams};
use crate::handlers::sessions::{self, LoginRequest, RefreshRequest};
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityRequest {
    pub is_available: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LocationRequest {
    #[validate(range(min = -90.0, max = 90.0, message = "Latitude must be between -90 and 90"))]
    pub latitude: f64,
    #[validate(range(min = -180.0, max = 180.0, message = "Longitude must be between -180 and 180"))]
    pub longitude: f64,
}

#[derive(Debug, Deserialize)]
pub struct AssignedOrdersQuery {
    pub status: Option<OrderStatus>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct DecisionRequest {
    pub decision: DeliveryDecision,
    #[validate(length(max = 500))]
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: OrderStatus,
}

/// Delivery agent auth and self-service routes, mounted at `/deliveryman`.
pub fn routes() -> Router<AppState> {
    let public = Router::new()
        .route("/login", post(login))
        .route("/refresh-token", post(refresh_token));

    let protected = Router::new()
        .route("/logout", post(logout))
        .route("/profile", get(profile))
        .route("/availability", patch(set_availability))
        .route("/location", patch(set_location))
        .route("/orders", get(assigned_orders))
        .route("/orders/:id/decision", patch(decide))
        .route("/orders/:id/status", patch(update_status))
        .route("/stats", get(stats))
        .with_actor(&[ActorKind::Deliveryman]);

    public.merge(protected)
}

async fn login(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<LoginRequest>,
) -> Result<Response, ServiceError> {
    sessions::login_as(&state, ActorKind::Deliveryman, payload).await
}

async fn refresh_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<RefreshRequest>>,
) -> Result<Response, ServiceError> {
    sessions::refresh_as(&state, ActorKind::Deliveryman, &headers, body).await
}

async fn logout(State(state): State<AppState>, actor: AuthActor) -> Result<Response, ServiceError> {
    sessions::logout_as(&state, &actor).await
}

async fn profile(State(state): State<AppState>, actor: AuthActor) -> Result<Response, ServiceError> {
    let agent = state.services.delivery.agent(actor.id).await?;
    Ok(success_response("Profile fetched successfully", agent))
}

async fn set_availability(
    State(state): State<AppState>,
    actor: AuthActor,
    JsonBody(payload): JsonBody<AvailabilityRequest>,
) -> Result<Response, ServiceError> {
    let agent = state
        .services
        .delivery
        .set_availability(actor.id, payload.is_available)
        .await?;
    Ok(success_response("Availability updated", agent))
}

async fn set_location(
    State(state): State<AppState>,
    actor: AuthActor,
    JsonBody(payload): JsonBody<LocationRequest>,
) -> Result<Response, ServiceError> {
    validate_input(&payload)?;
    let agent = state
        .services
        .delivery
        .set_location(actor.id, payload.latitude, payload.longitude)
        .await?;
    Ok(success_response("Location updated", agent))
}

async fn assigned_orders(
    State(state): State<AppState>,
    actor: AuthActor,
    QueryParams(query): QueryParams<AssignedOrdersQuery>,
) -> Result<Response, ServiceError> {
    let orders = state
        .services
        .delivery
        .assigned_orders(actor.id, query.status)
        .await?;
    Ok(success_response("Assigned orders fetched successfully", orders))
}

async fn decide(
    State(state): State<AppState>,
    actor: AuthActor,
    Path(order_id): Path<Uuid>,
    JsonBody(payload): JsonBody<DecisionRequest>,
) -> Result<Response, ServiceError> {
    validate_input(&payload)?;
    let order = state
        .services
        .delivery
        .decide(actor.id, order_id, payload.decision, payload.note)
        .await?;
    Ok(success_response(
        format!("Order {}", payload.decision.to_string().to_lowercase()),
        order,
    ))
}

async fn update_status(
    State(state): State<AppState>,
    actor: AuthActor,
    Path(order_id): Path<Uuid>,
    JsonBody(payload): JsonBody<StatusRequest>,
) -> Result<Response, ServiceError> {
    let order = state
        .services
        .delivery
        .update_status(actor.id, order_id, payload.status)
        .await?;
    Ok(success_response("Order status updated", order))
}

async fn stats(State(state): State<AppState>, actor: AuthActor) -> Result<Response, ServiceError> {
    let stats = state.services.delivery.stats(actor.id).await?;
    Ok(success_response("Stats fetched successfully", stats))
}
