use crate::handlers::common::{created_response, success_response, validate_input};
use crate::{errors::ApiError, services::commerce::CheckoutInput, AppState};
use axum::{
    extract::{Json, State},
    response::IntoResponse,
    routing::post,
    Router,
};
use tracing::info;

/// Creates the router for checkout endpoints
pub fn checkout_routes() -> Router<AppState> {
    Router::new().route("/", post(checkout))
}

/// Assemble an order from the session's cart.
///
/// Responds 201 with the new order, or 200 with the original order when the
/// idempotency key was already used for this session.
async fn checkout(
    State(state): State<AppState>,
    Json(payload): Json<CheckoutInput>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;

    let outcome = state.services.checkout.checkout(payload).await?;

    if outcome.is_replay() {
        info!(order_id = %outcome.order().order.id, "returning replayed checkout");
        Ok(success_response(outcome.into_order()))
    } else {
        Ok(created_response(outcome.into_order()))
    }
}
