//! Per-session cart of funnel products and order bumps.

use rusqlite::{Connection, TransactionBehavior};

use crate::db::queries;
use crate::error::{AppError, Result, msg};
use crate::models::{Cart, CartStatus, FunnelSession, PaymentRecord};

/// The session's cart, created on first use.
pub fn get_or_create_cart(conn: &Connection, session: &FunnelSession) -> Result<Cart> {
    if queries::insert_cart_if_absent(conn, session)? {
        tracing::debug!(session = %session.uuid, "Created cart");
    }
    queries::get_cart_by_session(conn, &session.uuid)?
        .ok_or_else(|| AppError::Internal("cart missing after insert".into()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Line {
    Product,
    Bump,
}

pub fn toggle_product(conn: &mut Connection, cart_id: &str, product_id: &str) -> Result<Cart> {
    toggle(conn, cart_id, product_id, Line::Product)
}

pub fn toggle_bump(conn: &mut Connection, cart_id: &str, bump_id: &str) -> Result<Cart> {
    toggle(conn, cart_id, bump_id, Line::Bump)
}

/// Flip membership of one id and recompute the subtotal from current prices.
fn toggle(conn: &mut Connection, cart_id: &str, item_id: &str, line: Line) -> Result<Cart> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let cart = queries::get_cart_by_id(&tx, cart_id)?
        .ok_or_else(|| AppError::NotFound(msg::CART_NOT_FOUND.into()))?;
    if cart.status == CartStatus::Recovered {
        return Err(AppError::Conflict("cart already checked out".into()));
    }

    let known = match line {
        Line::Product => queries::get_funnel_product(&tx, &cart.funnel_id, item_id)?.is_some(),
        Line::Bump => queries::get_funnel_bump(&tx, &cart.funnel_id, item_id)?.is_some(),
    };
    if !known {
        return Err(AppError::NotFound(match line {
            Line::Product => "Product not found in this funnel".into(),
            Line::Bump => "Bump not found in this funnel".into(),
        }));
    }

    let mut product_ids = cart.product_ids;
    let mut bump_ids = cart.bump_ids;
    let ids = match line {
        Line::Product => &mut product_ids,
        Line::Bump => &mut bump_ids,
    };
    match ids.iter().position(|id| id == item_id) {
        Some(pos) => {
            ids.remove(pos);
        }
        None => ids.push(item_id.to_string()),
    }

    let subtotal = queries::sum_product_prices(&tx, &cart.funnel_id, &product_ids)?
        + queries::sum_bump_prices(&tx, &cart.funnel_id, &bump_ids)?;

    let updated = queries::update_cart_selection(&tx, cart_id, &product_ids, &bump_ids, subtotal)?
        .ok_or_else(|| AppError::Conflict("cart already checked out".into()))?;
    tx.commit()?;
    Ok(updated)
}

pub fn update_contact(
    conn: &Connection,
    cart_id: &str,
    email: Option<&str>,
    phone: Option<&str>,
) -> Result<()> {
    let email = email.map(str::trim).filter(|s| !s.is_empty());
    let phone = phone.map(str::trim).filter(|s| !s.is_empty());
    if email.is_none() && phone.is_none() {
        return Ok(());
    }
    queries::update_cart_contact(conn, cart_id, email, phone)
}

/// Link a pending cart to the order that recovered it. A second call is a
/// no-op returning false.
pub fn mark_as_recovered(conn: &Connection, cart_id: &str, order: &dyn PaymentRecord) -> Result<bool> {
    let recovered = queries::try_mark_cart_recovered(conn, cart_id, order.id())?;
    if recovered {
        tracing::info!(cart = %cart_id, order = %order.order_number(), "Cart recovered");
    } else {
        tracing::debug!(cart = %cart_id, "Cart already recovered");
    }
    Ok(recovered)
}
