//! Turns a session's cart into a pending commerce order linked to its funnel.

use rusqlite::{Connection, TransactionBehavior};
use serde::Deserialize;
use serde_json::json;

use crate::db::queries;
use crate::error::{AppError, Result, msg};
use crate::id::gen_order_number;
use crate::models::{
    CartStatus, CreateOrder, FunnelSession, OrderKind, OrderMetadata, OrderRef, PAYMENT_INTENT_KEY,
    PaymentRecord,
};
use crate::payments::PaymentIntent;
use crate::tracking::{cart, events, ledger, session};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CheckoutContact {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

/// Create a pending order for the session's cart.
///
/// The total is recomputed from current funnel prices. The cart stays
/// `pending` until the order is paid.
pub fn place_order(
    conn: &mut Connection,
    funnel_session: &FunnelSession,
    contact: &CheckoutContact,
    currency: &str,
) -> Result<OrderRef> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let funnel = queries::get_funnel_by_id(&tx, &funnel_session.funnel_id)?
        .ok_or_else(|| AppError::NotFound(msg::FUNNEL_NOT_FOUND.into()))?;
    let cart = queries::get_cart_by_session(&tx, &funnel_session.uuid)?
        .ok_or_else(|| AppError::BadRequest("Cart is empty".into()))?;
    if cart.status == CartStatus::Recovered {
        return Err(AppError::Conflict("cart already checked out".into()));
    }
    if cart.is_empty() {
        return Err(AppError::BadRequest("Cart is empty".into()));
    }

    let total_cents = queries::sum_product_prices(&tx, &funnel.id, &cart.product_ids)?
        + queries::sum_bump_prices(&tx, &funnel.id, &cart.bump_ids)?;
    if total_cents <= 0 {
        return Err(AppError::BadRequest("Cart total must be positive".into()));
    }

    let step = match funnel_session.current_step_id.as_deref() {
        Some(id) => queries::get_step_by_id(&tx, id)?.filter(|s| s.funnel_id == funnel.id),
        None => None,
    };

    let email = contact
        .email
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .or_else(|| funnel_session.email.clone())
        .or_else(|| cart.email.clone());

    let mut metadata = OrderMetadata {
        funnel_id: Some(funnel.id.clone()),
        funnel_slug: Some(funnel.slug.clone()),
        step_slug: step.as_ref().map(|s| s.slug.clone()),
        session_uuid: Some(funnel_session.uuid.clone()),
        ..Default::default()
    };
    metadata.extra.insert("product_ids".into(), json!(cart.product_ids));
    metadata.extra.insert("bump_ids".into(), json!(cart.bump_ids));
    if let Some(name) = contact.name.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        metadata.extra.insert("customer_name".into(), json!(name));
    }

    let order = queries::create_order(
        &tx,
        OrderKind::Product,
        &CreateOrder {
            order_number: gen_order_number(ledger::today()),
            total_cents,
            currency: currency.to_string(),
            metadata,
            email,
        },
    )?;
    let order = OrderRef::new(OrderKind::Product, order);

    queries::create_funnel_order(
        &tx,
        &queries::NewFunnelOrder {
            funnel_id: &funnel.id,
            step_id: step.as_ref().map(|s| s.id.as_str()),
            session_uuid: Some(&funnel_session.uuid),
            order_kind: order.kind(),
            order_id: order.id(),
            order_number: order.order_number(),
            revenue_cents: total_cents,
            affiliate_id: funnel_session.affiliate_id.as_deref(),
        },
    )?;

    cart::update_contact(&tx, &cart.id, contact.email.as_deref(), contact.phone.as_deref())?;
    session::update_contact(&tx, funnel_session, contact.email.as_deref(), contact.phone.as_deref())?;

    let payload = json!({
        "order_number": order.order_number(),
        "total_cents": total_cents,
        "product_ids": cart.product_ids,
        "bump_ids": cart.bump_ids,
    });
    if let Err(e) = session::track_event(
        &tx,
        funnel_session,
        events::CHECKOUT_STARTED,
        payload,
        step.as_ref().map(|s| s.id.as_str()),
    ) {
        tracing::warn!(session = %funnel_session.uuid, "Failed to record checkout_started event: {}", e);
    }

    tx.commit()?;

    tracing::info!(
        funnel = %funnel.slug,
        order = %order.order_number(),
        total_cents,
        "Order placed"
    );
    Ok(order)
}

/// Remember the gateway intent on the order without touching other metadata.
pub fn attach_payment_intent(conn: &Connection, order: &dyn PaymentRecord, intent: &PaymentIntent) -> Result<()> {
    queries::merge_order_metadata(conn, order.kind(), order.id(), PAYMENT_INTENT_KEY, &intent.intent_id)?;
    Ok(())
}
