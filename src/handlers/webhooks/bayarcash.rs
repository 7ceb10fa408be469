use axum::{extract::State, http::StatusCode};

use super::common::{WebhookResult, internal_error, outcome_response};
use crate::db::AppState;
use crate::extractors::Form;
use crate::models::PaymentChannel;
use crate::payments::{GatewayPayload, map_status};
use crate::reconcile::{OrderReconciler, PaymentNotice};

/// Server-to-server payment notification from Bayarcash.
pub async fn handle_bayarcash_callback(
    State(state): State<AppState>,
    Form(payload): Form<GatewayPayload>,
) -> WebhookResult {
    if payload.get("checksum").map_or(true, |c| c.is_empty()) {
        return (StatusCode::BAD_REQUEST, "Missing checksum");
    }
    let Some(order_number) = payload.get("order_number").filter(|o| !o.is_empty()) else {
        return (StatusCode::BAD_REQUEST, "Missing order_number");
    };

    if !state.gateway.verify_callback(&payload) {
        tracing::warn!(order = %order_number, "Bayarcash callback checksum mismatch");
        return (StatusCode::BAD_REQUEST, "Invalid checksum");
    }

    let raw_status = payload.get("status").map(String::as_str).unwrap_or_default();
    let Some(status) = map_status(raw_status) else {
        tracing::warn!(order = %order_number, status = %raw_status, "Unknown Bayarcash status");
        return (StatusCode::BAD_REQUEST, "Unknown status");
    };

    let notice = PaymentNotice {
        order_number: order_number.clone(),
        transaction_id: payload.get("transaction_id").cloned(),
        status,
        channel: PaymentChannel::Callback,
        verified: true,
    };

    match OrderReconciler::from_state(&state).reconcile(&notice).await {
        Ok(outcome) => outcome_response(&outcome),
        Err(e) => internal_error(e),
    }
}
