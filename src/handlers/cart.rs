use axum::{
    extract::{Path, State},
    response::Response,
    routing::{get, patch},
    Router,
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::auth::{ActorKind, AuthActor, AuthRouterExt};
use crate::errors::ServiceError;
use crate::handlers::common::{success_response, validate_input, JsonBody};
use crate::AppState;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AddToCartRequest {
    pub product_id: Uuid,
    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub quantity: i32,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateCartItemRequest {
    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub quantity: i32,
}

/// Cart routes, mounted at `/cart`; customers only.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(get_cart).post(add_to_cart).delete(clear_cart))
        .route("/:product_id", patch(update_item).delete(remove_item))
        .with_actor(&[ActorKind::Customer])
}

async fn get_cart(State(state): State<AppState>, actor: AuthActor) -> Result<Response, ServiceError> {
    let cart = state.services.cart.get(actor.id).await?;
    Ok(success_response("Cart fetched successfully", cart))
}

async fn add_to_cart(
    State(state): State<AppState>,
    actor: AuthActor,
    JsonBody(payload): JsonBody<AddToCartRequest>,
) -> Result<Response, ServiceError> {
    validate_input(&payload)?;
    let cart = state
        .services
        .cart
        .add_item(actor.id, payload.product_id, payload.quantity)
        .await?;
    Ok(success_response("Item added to cart", cart))
}

async fn update_item(
    State(state): State<AppState>,
    actor: AuthActor,
    Path(product_id): Path<Uuid>,
    JsonBody(payload): JsonBody<UpdateCartItemRequest>,
) -> Result<Response, ServiceError> {
    validate_input(&payload)?;
    let cart = state
        .services
        .cart
        .update_item(actor.id, product_id, payload.quantity)
        .await?;
    Ok(success_response("Cart item updated", cart))
}

async fn remove_item(
    State(state): State<AppState>,
    actor: AuthActor,
    Path(product_id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    let cart = state.services.cart.remove_item(actor.id, product_id).await?;
    Ok(success_response("Item removed from cart", cart))
}

async fn clear_cart(State(state): State<AppState>, actor: AuthActor) -> Result<Response, ServiceError> {
    let cart = state.services.cart.clear(actor.id).await?;
    Ok(success_response("Cart cleared", cart))
}
