use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
};

use super::common::{WebhookResult, internal_error, outcome_response};
use crate::db::{AppState, queries};
use crate::models::PaymentChannel;
use crate::payments::{StripeDispatch, StripeWebhookEvent, dispatch_event};
use crate::reconcile::{OrderReconciler, PaymentNotice};

const PROVIDER: &str = "stripe";

fn extract_signature(headers: &HeaderMap) -> Result<&str, WebhookResult> {
    headers
        .get("stripe-signature")
        .ok_or((StatusCode::BAD_REQUEST, "Missing stripe-signature header"))?
        .to_str()
        .map_err(|e| {
            tracing::debug!("Invalid UTF-8 in Stripe signature header: {}", e);
            (StatusCode::BAD_REQUEST, "Invalid signature header")
        })
}

pub async fn handle_stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> WebhookResult {
    handle(&state, &headers, &body)
        .await
        .unwrap_or_else(|e| e)
}

async fn handle(state: &AppState, headers: &HeaderMap, body: &Bytes) -> Result<WebhookResult, WebhookResult> {
    let Some(stripe) = state.stripe.as_ref() else {
        return Err((StatusCode::SERVICE_UNAVAILABLE, "Stripe not configured"));
    };

    let signature = extract_signature(headers)?;
    match stripe.verify_webhook_signature(body, signature) {
        Ok(true) => {}
        Ok(false) => return Err((StatusCode::BAD_REQUEST, "Invalid signature")),
        Err(e) => {
            tracing::debug!("Malformed Stripe signature: {}", e);
            return Err((StatusCode::BAD_REQUEST, "Invalid signature"));
        }
    }

    let event: StripeWebhookEvent = serde_json::from_slice(body).map_err(|e| {
        tracing::error!("Failed to parse Stripe webhook: {}", e);
        (StatusCode::BAD_REQUEST, "Invalid JSON")
    })?;

    {
        let conn = state.db.get().map_err(|e| internal_error(e.into()))?;
        if queries::webhook_event_exists(&conn, PROVIDER, &event.id).map_err(internal_error)? {
            tracing::debug!(event = %event.id, "Stripe event replayed");
            return Ok((StatusCode::OK, "Already processed"));
        }
    }

    let update = match dispatch_event(&event) {
        Ok(StripeDispatch::Apply(update)) => update,
        Ok(StripeDispatch::Ignore) => return Ok((StatusCode::OK, "Event ignored")),
        Err(e) => {
            tracing::error!(event = %event.id, "Malformed Stripe event object: {}", e);
            return Err((StatusCode::BAD_REQUEST, "Invalid event object"));
        }
    };

    let notice = PaymentNotice {
        order_number: update.order_number,
        transaction_id: Some(update.transaction_id),
        status: update.status,
        channel: PaymentChannel::Callback,
        verified: true,
    };
    let outcome = OrderReconciler::from_state(state)
        .reconcile(&notice)
        .await
        .map_err(internal_error)?;

    // Recorded only once an order was found so a failed delivery can be retried.
    if outcome.order().is_some() {
        let conn = state.db.get().map_err(|e| internal_error(e.into()))?;
        if let Err(e) = queries::try_record_webhook_event(&conn, PROVIDER, &event.id) {
            tracing::warn!(event = %event.id, "Failed to record Stripe event: {}", e);
        }
    }

    Ok(outcome_response(&outcome))
}
