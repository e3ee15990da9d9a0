use crate::handlers::common::{success_response, validate_input};
use crate::{errors::ApiError, AppState};
use axum::{
    extract::{Json, Path, State},
    response::IntoResponse,
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Creates the router for session cart endpoints
pub fn carts_routes() -> Router<AppState> {
    Router::new()
        .route("/:session_key", get(get_cart))
        .route("/:session_key/items", post(add_item))
        .route(
            "/:session_key/items/:item_id",
            delete(remove_item).patch(update_quantity),
        )
        .route("/:session_key/clear", post(clear_cart))
}

/// Current cart with live catalog prices
async fn get_cart(
    State(state): State<AppState>,
    Path(session_key): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let cart = state.services.cart.get_cart(&session_key).await?;
    Ok(success_response(cart))
}

/// Add a service to the cart; repeated adds accumulate
async fn add_item(
    State(state): State<AppState>,
    Path(session_key): Path<String>,
    Json(payload): Json<AddItemRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;

    let cart = state
        .services
        .cart
        .add_item(&session_key, &payload.service_id, payload.quantity)
        .await?;

    Ok(success_response(cart))
}

/// Overwrite a line's quantity
async fn update_quantity(
    State(state): State<AppState>,
    Path((session_key, item_id)): Path<(String, Uuid)>,
    Json(payload): Json<UpdateQuantityRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let cart = state
        .services
        .cart
        .update_quantity(&session_key, item_id, payload.quantity)
        .await?;

    Ok(success_response(cart))
}

/// Remove a line; removing a missing line is not an error
async fn remove_item(
    State(state): State<AppState>,
    Path((session_key, item_id)): Path<(String, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
    let cart = state
        .services
        .cart
        .remove_item(&session_key, item_id)
        .await?;

    Ok(success_response(cart))
}

/// Empty the cart
async fn clear_cart(
    State(state): State<AppState>,
    Path(session_key): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let cart = state.services.cart.clear(&session_key).await?;
    Ok(success_response(cart))
}

// Request DTOs

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct AddItemRequest {
    #[validate(length(min = 1, max = 64))]
    pub service_id: String,
    #[serde(default = "default_quantity")]
    pub quantity: i32,
}

fn default_quantity() -> i32 {
    1
}

#[derive(Debug, Deserialize, Serialize)]
pub struct UpdateQuantityRequest {
    pub quantity: i32,
}
