use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;
use validator::Validate;

use crate::{
    entities::{OrderStatus, TransitionTrigger},
    errors::ApiError,
    handlers::common::{success_response, validate_input, PaginatedResponse},
    services::order_status::PaymentSignal,
    AppState,
};

/// Order routes: admin listing and lifecycle plus storefront order history
pub fn orders_routes() -> Router<AppState> {
    Router::new()
        .route("/orders", get(list_orders))
        .route("/orders/:order_id", get(get_order))
        .route("/orders/:order_id/status", patch(update_status))
        .route("/orders/:order_id/payment", post(payment_signal))
        .route("/orders/:order_id/transitions", get(order_transitions))
        .route("/sessions/:session_key/orders", get(session_orders))
        .route("/customers/:customer_id/orders", get(customer_orders))
}

fn parse_status(raw: &str) -> Result<OrderStatus, ApiError> {
    OrderStatus::from_str(&raw.trim().to_ascii_lowercase())
        .map_err(|_| ApiError::BadRequest(format!("Unknown order status: {}", raw)))
}

#[derive(Debug, Default, Deserialize)]
pub struct ListOrdersQuery {
    pub status: Option<String>,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

/// Newest-first order listing, optionally filtered by status
async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<ListOrdersQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let status = query.status.as_deref().map(parse_status).transpose()?;

    let page = state
        .services
        .orders
        .list_orders(status, query.page, query.per_page)
        .await?;

    Ok(success_response(PaginatedResponse::new(
        page.orders,
        page.page,
        page.per_page,
        page.total,
    )))
}

/// Get an order with its items
async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state.services.orders.get_order(order_id).await?;
    Ok(success_response(order))
}

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct UpdateStatusRequest {
    pub target_status: String,
    #[validate(length(max = 1000))]
    pub note: Option<String>,
}

/// Admin status change
async fn update_status(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    let target = parse_status(&payload.target_status)?;

    let order = state
        .services
        .order_status
        .transition(order_id, target, TransitionTrigger::Admin, payload.note)
        .await?;

    Ok(success_response(order))
}

/// Payment gateway outcome for an order
async fn payment_signal(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Json(payload): Json<PaymentSignal>,
) -> Result<impl IntoResponse, ApiError> {
    if payload.reference.as_ref().is_some_and(|r| r.len() > 255) {
        return Err(ApiError::ValidationError(
            "payment reference must be at most 255 characters".to_string(),
        ));
    }

    let order = state
        .services
        .order_status
        .apply_payment_signal(order_id, payload)
        .await?;

    Ok(success_response(order))
}

/// Audit log of accepted transitions, oldest first
async fn order_transitions(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let history = state.services.order_status.history(order_id).await?;
    Ok(success_response(history))
}

/// Orders placed from a browsing session
async fn session_orders(
    State(state): State<AppState>,
    Path(session_key): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let orders = state
        .services
        .orders
        .orders_for_session(&session_key)
        .await?;
    Ok(success_response(orders))
}

/// Orders placed by a signed-in customer
async fn customer_orders(
    State(state): State<AppState>,
    Path(customer_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let orders = state
        .services
        .orders
        .orders_for_customer(&customer_id)
        .await?;
    Ok(success_response(orders))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn status_parsing_is_case_insensitive() {
        assert_eq!(parse_status("Processing").unwrap(), OrderStatus::Processing);
        assert_eq!(parse_status(" cancelled ").unwrap(), OrderStatus::Cancelled);
    }

    #[test]
    fn unknown_status_is_bad_request() {
        assert_matches!(parse_status("shipped"), Err(ApiError::BadRequest(_)));
    }
}
