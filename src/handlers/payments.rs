use axum::{
    extract::{Path, State},
    response::Response,
    routing::{get, post},
    Form, Router,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::auth::{ActorKind, AuthActor, AuthRouterExt};
use crate::errors::ServiceError;
use crate::handlers::common::{
    message_response, redirect_response, success_response, validate_input, JsonBody,
};
use crate::services::payments::{CallbackPayload, InitPaymentInput, PaymentLineInput};
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentItemRequest {
    pub product_id: Uuid,
    pub quantity: i32,
    pub price: Option<Decimal>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct InitPaymentRequest {
    pub items: Option<Vec<PaymentItemRequest>>,
    #[validate(length(min = 1, max = 500, message = "Shipping address is required"))]
    pub shipping_address: String,
    #[validate(length(min = 1, max = 20, message = "Phone is required"))]
    pub phone: String,
}

/// Payment routes, mounted at `/payment`. Gateway callbacks are public.
pub fn routes() -> Router<AppState> {
    let callbacks = Router::new()
        .route("/success", post(payment_success))
        .route("/fail", post(payment_fail))
        .route("/cancel", post(payment_cancel))
        .route("/ipn", post(payment_ipn));

    let customer = Router::new()
        .route("/init", post(init_payment))
        .with_actor(&[ActorKind::Customer]);

    let owner_or_admin = Router::new()
        .route("/:tran_id", get(payment_status))
        .with_actor(&[ActorKind::Customer, ActorKind::Admin]);

    callbacks.merge(customer).merge(owner_or_admin)
}

fn callback_fields(form: Option<Form<CallbackPayload>>) -> CallbackPayload {
    form.map(|Form(fields)| fields).unwrap_or_default()
}

async fn init_payment(
    State(state): State<AppState>,
    actor: AuthActor,
    JsonBody(payload): JsonBody<InitPaymentRequest>,
) -> Result<Response, ServiceError> {
    validate_input(&payload)?;
    let items = payload.items.map(|items| {
        items
            .into_iter()
            .map(|item| PaymentLineInput {
                product_id: item.product_id,
                quantity: item.quantity,
                price: item.price,
            })
            .collect()
    });
    let session = state
        .services
        .payments
        .init(
            actor.id,
            InitPaymentInput {
                items,
                shipping_address: payload.shipping_address,
                phone: payload.phone,
            },
        )
        .await?;
    Ok(success_response("Payment session created", session))
}

async fn payment_success(
    State(state): State<AppState>,
    form: Option<Form<CallbackPayload>>,
) -> Response {
    let location = state
        .services
        .payments
        .handle_success(callback_fields(form))
        .await;
    redirect_response(&location)
}

async fn payment_fail(
    State(state): State<AppState>,
    form: Option<Form<CallbackPayload>>,
) -> Response {
    let location = state
        .services
        .payments
        .handle_fail(callback_fields(form))
        .await;
    redirect_response(&location)
}

async fn payment_cancel(
    State(state): State<AppState>,
    form: Option<Form<CallbackPayload>>,
) -> Response {
    let location = state
        .services
        .payments
        .handle_cancel(callback_fields(form))
        .await;
    redirect_response(&location)
}

async fn payment_ipn(
    State(state): State<AppState>,
    form: Option<Form<CallbackPayload>>,
) -> Result<Response, ServiceError> {
    state
        .services
        .payments
        .handle_ipn(callback_fields(form))
        .await?;
    Ok(message_response("IPN received"))
}

async fn payment_status(
    State(state): State<AppState>,
    actor: AuthActor,
    Path(tran_id): Path<String>,
) -> Result<Response, ServiceError> {
    let payment = state
        .services
        .payments
        .status_for(&actor, &tran_id)
        .await?;
    Ok(success_response("Payment fetched successfully", payment))
}
