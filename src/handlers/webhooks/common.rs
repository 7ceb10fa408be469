//! Shared plumbing for gateway webhooks.

use axum::http::StatusCode;

use crate::error::AppError;
use crate::reconcile::ReconcileOutcome;

/// Result type for webhook operations.
pub type WebhookResult = (StatusCode, &'static str);

/// Gateways retry on anything but 2xx, so only a missing order and storage
/// failures leave the 200 range.
pub fn outcome_response(outcome: &ReconcileOutcome) -> WebhookResult {
    match outcome {
        ReconcileOutcome::Applied { .. } => (StatusCode::OK, "OK"),
        ReconcileOutcome::AlreadyProcessed { .. } => (StatusCode::OK, "Already processed"),
        ReconcileOutcome::InvalidTransition { .. } => (StatusCode::OK, "Ignored"),
        ReconcileOutcome::OrderNotFound => (StatusCode::NOT_FOUND, "Order not found"),
        ReconcileOutcome::VerificationFailed => (StatusCode::BAD_REQUEST, "Invalid signature"),
    }
}

pub fn internal_error(e: AppError) -> WebhookResult {
    tracing::error!("Webhook processing failed: {}", e);
    (StatusCode::INTERNAL_SERVER_ERROR, "Database error")
}
