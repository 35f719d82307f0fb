use axum::{
    extract::{Path, State},
    response::Response,
    routing::{get, patch, post},
    Router,
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::auth::{ActorKind, AuthActor, AuthRouterExt};
use crate::entities::order::OrderStatus;
use crate::errors::ServiceError;
use crate::handlers::common::{
    created_response, success_response, validate_input, JsonBody, PaginationParams, QueryParams,
};
use crate::services::orders::CheckoutInput;
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemRequest {
    pub product_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    #[validate(length(min = 1, max = 500, message = "Shipping address is required"))]
    pub shipping_address: String,
    #[validate(length(min = 1, max = 20, message = "Phone is required"))]
    pub phone: String,
    pub items: Option<Vec<OrderItemRequest>>,
}

#[derive(Debug, Deserialize)]
pub struct OrderListQuery {
    pub status: Option<OrderStatus>,
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: OrderStatus,
}

/// Order routes, mounted at `/orders`.
pub fn routes() -> Router<AppState> {
    let customer = Router::new()
        .route("/", post(create_order))
        .route("/my-orders", get(my_orders))
        .route("/:id/cancel", patch(cancel_order))
        .with_actor(&[ActorKind::Customer]);

    let owner_or_admin = Router::new()
        .route("/:id", get(get_order))
        .with_actor(&[ActorKind::Customer, ActorKind::Admin]);

    let admin = Router::new()
        .route("/all", get(all_orders))
        .route("/:id/status", patch(update_status))
        .with_actor(&[ActorKind::Admin]);

    customer.merge(owner_or_admin).merge(admin)
}

async fn create_order(
    State(state): State<AppState>,
    actor: AuthActor,
    JsonBody(payload): JsonBody<CreateOrderRequest>,
) -> Result<Response, ServiceError> {
    validate_input(&payload)?;
    if let Some(items) = &payload.items {
        if items.iter().any(|item| item.quantity < 1) {
            return Err(ServiceError::ValidationError(
                "Quantity must be at least 1".into(),
            ));
        }
    }
    let items = payload.items.map(|items| {
        items
            .into_iter()
            .map(|item| (item.product_id, item.quantity))
            .collect()
    });
    let order = state
        .services
        .orders
        .checkout(
            actor.id,
            CheckoutInput {
                shipping_address: payload.shipping_address,
                phone: payload.phone,
                items,
            },
        )
        .await?;
    Ok(created_response("Order placed successfully", order))
}

async fn my_orders(State(state): State<AppState>, actor: AuthActor) -> Result<Response, ServiceError> {
    let orders = state.services.orders.list_for_user(actor.id).await?;
    Ok(success_response("Orders fetched successfully", orders))
}

async fn get_order(
    State(state): State<AppState>,
    actor: AuthActor,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    let order = state.services.orders.get_for(&actor, id).await?;
    Ok(success_response("Order fetched successfully", order))
}

async fn cancel_order(
    State(state): State<AppState>,
    actor: AuthActor,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    let order = state.services.orders.cancel(actor.id, id).await?;
    Ok(success_response("Order cancelled successfully", order))
}

async fn all_orders(
    State(state): State<AppState>,
    QueryParams(query): QueryParams<OrderListQuery>,
) -> Result<Response, ServiceError> {
    let defaults = PaginationParams::default();
    let page = state
        .services
        .orders
        .list_all(
            query.status,
            query.page.unwrap_or(defaults.page),
            query.limit.unwrap_or(defaults.limit),
        )
        .await?;
    Ok(success_response("Orders fetched successfully", page))
}

async fn update_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    JsonBody(payload): JsonBody<UpdateStatusRequest>,
) -> Result<Response, ServiceError> {
    let order = state
        .services
        .orders
        .set_status(id, payload.status)
        .await?;
    Ok(success_response("Order status updated", order))
}
