use axum::{extract::State, response::Redirect};

use crate::db::AppState;
use crate::error::msg;
use crate::extractors::Query;
use crate::models::{OrderRef, OrderStatus, PaymentChannel, PaymentRecord};
use crate::payments::{GatewayPayload, map_status};
use crate::reconcile::{
    OrderReconciler, PaymentNotice, ReconcileOutcome, ReturnDisposition, find_order,
    order_not_found_redirect, resolve_return_redirect,
};
use crate::util::append_query_params;

/// Browser lands here after the Bayarcash payment page.
///
/// Always answers with a 303. A failed checksum is tolerated only when the
/// gateway reports success; the server callback remains authoritative.
pub async fn bayarcash_return(
    State(state): State<AppState>,
    Query(payload): Query<GatewayPayload>,
) -> Redirect {
    Redirect::to(&return_location(&state, &payload).await)
}

async fn return_location(state: &AppState, payload: &GatewayPayload) -> String {
    let Some(order_number) = payload.get("order_number").filter(|o| !o.is_empty()) else {
        return order_not_found_redirect(&state.base_url);
    };
    let verified = state.gateway.verify_return(payload);

    let raw_status = payload.get("status").map(String::as_str).unwrap_or_default();
    let Some(status) = map_status(raw_status) else {
        if !verified {
            tracing::warn!(order = %order_number, status = %raw_status, "Unverified return without a known status");
            return unverified_location(state, order_number);
        }
        tracing::warn!(order = %order_number, status = %raw_status, "Unknown status on payment return");
        return current_state_location(state, order_number);
    };

    let notice = PaymentNotice {
        order_number: order_number.clone(),
        transaction_id: payload.get("transaction_id").cloned(),
        status,
        channel: PaymentChannel::Return,
        verified,
    };

    match OrderReconciler::from_state(state).reconcile(&notice).await {
        Ok(ReconcileOutcome::OrderNotFound) => order_not_found_redirect(&state.base_url),
        Ok(ReconcileOutcome::VerificationFailed) => unverified_location(state, order_number),
        Ok(outcome) => match outcome.order() {
            Some(order) => location_for(state, order, disposition_for(order.status())),
            None => order_not_found_redirect(&state.base_url),
        },
        Err(e) => {
            tracing::error!(order = %order_number, "Payment return failed: {}", e);
            pending_fallback(&state.base_url)
        }
    }
}

/// What the shopper sees is driven by the stored status, not the notice,
/// so a late or contradictory return still lands on the right page.
fn disposition_for(status: OrderStatus) -> ReturnDisposition {
    match status {
        OrderStatus::Paid => ReturnDisposition::Success,
        OrderStatus::Failed => ReturnDisposition::Failure(msg::PAYMENT_FAILED),
        OrderStatus::Pending | OrderStatus::Processing => ReturnDisposition::Pending,
    }
}

/// Error page for a return whose checksum did not match. Nothing is applied.
fn unverified_location(state: &AppState, order_number: &str) -> String {
    match lookup(state, order_number) {
        Some(order) => location_for(state, &order, ReturnDisposition::Failure(msg::PAYMENT_UNVERIFIED)),
        None => order_not_found_redirect(&state.base_url),
    }
}

/// Redirect without applying anything, based on the stored order.
fn current_state_location(state: &AppState, order_number: &str) -> String {
    match lookup(state, order_number) {
        Some(order) => location_for(state, &order, disposition_for(order.status())),
        None => order_not_found_redirect(&state.base_url),
    }
}

fn lookup(state: &AppState, order_number: &str) -> Option<OrderRef> {
    let conn = match state.db.get() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("DB connection error: {}", e);
            return None;
        }
    };
    match find_order(&conn, order_number) {
        Ok(order) => order,
        Err(e) => {
            tracing::error!(order = %order_number, "Order lookup failed: {}", e);
            None
        }
    }
}

fn location_for(state: &AppState, order: &OrderRef, disposition: ReturnDisposition) -> String {
    let resolved = state
        .db
        .get()
        .map_err(Into::into)
        .and_then(|conn| resolve_return_redirect(&conn, &state.base_url, order, disposition));
    match resolved {
        Ok(url) => url,
        Err(e) => {
            tracing::error!(order = %order.order_number(), "Failed to resolve return redirect: {}", e);
            pending_fallback(&state.base_url)
        }
    }
}

fn pending_fallback(base_url: &str) -> String {
    append_query_params(
        &format!("{}/", base_url.trim_end_matches('/')),
        &[("status", "pending"), ("message", msg::PAYMENT_PENDING)],
    )
}
