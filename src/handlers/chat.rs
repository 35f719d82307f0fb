use axum::{extract::State, response::Response, routing::post, Router};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::errors::ServiceError;
use crate::handlers::common::{success_response, validate_input, JsonBody};
use crate::AppState;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[validate(length(min = 1, message = "Message is required"))]
    pub message: String,
    pub product_id: Option<Uuid>,
}

/// Shopping assistant, mounted at `/chat`; public.
pub fn routes() -> Router<AppState> {
    Router::new().route("/", post(chat))
}

async fn chat(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<ChatRequest>,
) -> Result<Response, ServiceError> {
    validate_input(&payload)?;
    let reply = state
        .services
        .chat
        .respond(&payload.message, payload.product_id)
        .await?;
    Ok(success_response("Chat response generated", reply))
}
