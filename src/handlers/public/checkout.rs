use axum::extract::State;
use serde::Serialize;

use crate::checkout::{self, CheckoutContact};
use crate::db::{AppState, queries};
use crate::error::{AppError, Result, msg};
use crate::extractors::{Json, Path};
use crate::models::{Order, PaymentRecord};

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub order: Order,
    pub payment_url: String,
}

/// Place the session's cart as an order and open a gateway payment page.
pub async fn start_checkout(
    State(state): State<AppState>,
    Path(session_uuid): Path<String>,
    Json(contact): Json<CheckoutContact>,
) -> Result<Json<CheckoutResponse>> {
    let order = {
        let mut conn = state.db.get()?;
        let session = queries::get_session(&conn, &session_uuid)?
            .ok_or_else(|| AppError::NotFound(msg::SESSION_NOT_FOUND.into()))?;
        checkout::place_order(&mut conn, &session, &contact, &state.default_currency)?
    };

    let intent = state.gateway.create_payment_intent(&order).await.map_err(|e| {
        tracing::error!(order = %order.order_number(), gateway = state.gateway.name(), "Payment intent failed: {}", e);
        AppError::Gateway(e)
    })?;

    {
        let conn = state.db.get()?;
        checkout::attach_payment_intent(&conn, &order, &intent)?;
    }

    tracing::info!(
        order = %order.order_number(),
        intent = %intent.intent_id,
        "Checkout started"
    );

    Ok(Json(CheckoutResponse {
        order: order.into_order(),
        payment_url: intent.url,
    }))
}
