use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::id::EntityType;
use crate::models::*;

use super::from_row::{
    AFFILIATE_CONVERSION_COLS, CART_COLS, FUNNEL_AFFILIATE_COLS, FUNNEL_BUMP_COLS, FUNNEL_COLS,
    FUNNEL_ORDER_COLS, FUNNEL_PRODUCT_COLS, FUNNEL_STATS_COLS, FUNNEL_STEP_COLS, ORDER_COLS,
    SESSION_COLS, SESSION_EVENT_COLS, STEP_STATS_COLS, query_all, query_one,
};

pub fn now() -> i64 {
    Utc::now().timestamp()
}

// ============ Funnels ============

pub fn create_funnel(conn: &Connection, input: &CreateFunnel) -> Result<Funnel> {
    let id = EntityType::Funnel.gen_id();
    let now = now();
    conn.execute(
        "INSERT INTO funnels (id, slug, name, status, pixel_id, pixel_access_token, created_at)
         VALUES (?1, ?2, ?3, 'published', ?4, ?5, ?6)",
        params![
            &id,
            &input.slug,
            &input.name,
            &input.pixel_id,
            &input.pixel_access_token,
            now
        ],
    )?;
    Ok(Funnel {
        id,
        slug: input.slug.clone(),
        name: input.name.clone(),
        status: "published".to_string(),
        pixel_id: input.pixel_id.clone(),
        pixel_access_token: input.pixel_access_token.clone(),
        created_at: now,
    })
}

pub fn get_funnel_by_id(conn: &Connection, id: &str) -> Result<Option<Funnel>> {
    query_one(
        conn,
        &format!("SELECT {} FROM funnels WHERE id = ?1", FUNNEL_COLS),
        &[&id],
    )
}

pub fn get_funnel_by_slug(conn: &Connection, slug: &str) -> Result<Option<Funnel>> {
    query_one(
        conn,
        &format!("SELECT {} FROM funnels WHERE slug = ?1", FUNNEL_COLS),
        &[&slug],
    )
}

pub fn create_funnel_step(
    conn: &Connection,
    funnel_id: &str,
    input: &CreateFunnelStep,
) -> Result<FunnelStep> {
    let id = EntityType::FunnelStep.gen_id();
    conn.execute(
        "INSERT INTO funnel_steps (id, funnel_id, slug, step_type, sort_order)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            &id,
            funnel_id,
            &input.slug,
            input.step_type.as_str(),
            input.sort_order
        ],
    )?;
    Ok(FunnelStep {
        id,
        funnel_id: funnel_id.to_string(),
        slug: input.slug.clone(),
        step_type: input.step_type,
        sort_order: input.sort_order,
    })
}

pub fn get_step_by_id(conn: &Connection, id: &str) -> Result<Option<FunnelStep>> {
    query_one(
        conn,
        &format!("SELECT {} FROM funnel_steps WHERE id = ?1", FUNNEL_STEP_COLS),
        &[&id],
    )
}

pub fn get_step_by_slug(conn: &Connection, funnel_id: &str, slug: &str) -> Result<Option<FunnelStep>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM funnel_steps WHERE funnel_id = ?1 AND slug = ?2",
            FUNNEL_STEP_COLS
        ),
        &[&funnel_id, &slug],
    )
}

/// First step of the given type by sort order (e.g. the funnel's thank-you page).
pub fn get_first_step_of_type(
    conn: &Connection,
    funnel_id: &str,
    step_type: StepType,
) -> Result<Option<FunnelStep>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM funnel_steps WHERE funnel_id = ?1 AND step_type = ?2
             ORDER BY sort_order, id LIMIT 1",
            FUNNEL_STEP_COLS
        ),
        &[&funnel_id, &step_type.as_str()],
    )
}

pub fn create_funnel_product(
    conn: &Connection,
    funnel_id: &str,
    step_id: Option<&str>,
    name: &str,
    funnel_price_cents: i64,
) -> Result<FunnelProduct> {
    let id = EntityType::FunnelProduct.gen_id();
    conn.execute(
        "INSERT INTO funnel_products (id, funnel_id, step_id, name, funnel_price_cents)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![&id, funnel_id, step_id, name, funnel_price_cents],
    )?;
    Ok(FunnelProduct {
        id,
        funnel_id: funnel_id.to_string(),
        step_id: step_id.map(String::from),
        name: name.to_string(),
        funnel_price_cents,
    })
}

pub fn get_funnel_product(conn: &Connection, funnel_id: &str, id: &str) -> Result<Option<FunnelProduct>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM funnel_products WHERE funnel_id = ?1 AND id = ?2",
            FUNNEL_PRODUCT_COLS
        ),
        &[&funnel_id, &id],
    )
}

pub fn create_funnel_bump(
    conn: &Connection,
    funnel_id: &str,
    step_id: Option<&str>,
    name: &str,
    price_cents: i64,
) -> Result<FunnelBump> {
    let id = EntityType::FunnelBump.gen_id();
    conn.execute(
        "INSERT INTO funnel_bumps (id, funnel_id, step_id, name, price_cents)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![&id, funnel_id, step_id, name, price_cents],
    )?;
    Ok(FunnelBump {
        id,
        funnel_id: funnel_id.to_string(),
        step_id: step_id.map(String::from),
        name: name.to_string(),
        price_cents,
    })
}

pub fn get_funnel_bump(conn: &Connection, funnel_id: &str, id: &str) -> Result<Option<FunnelBump>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM funnel_bumps WHERE funnel_id = ?1 AND id = ?2",
            FUNNEL_BUMP_COLS
        ),
        &[&funnel_id, &id],
    )
}

/// Sum of funnel prices for the given product ids. Unknown ids contribute nothing.
pub fn sum_product_prices(conn: &Connection, funnel_id: &str, ids: &[String]) -> Result<i64> {
    let ids_json = serde_json::to_string(ids)?;
    let total = conn.query_row(
        "SELECT COALESCE(SUM(funnel_price_cents), 0) FROM funnel_products
         WHERE funnel_id = ?1 AND id IN (SELECT value FROM json_each(?2))",
        params![funnel_id, ids_json],
        |row| row.get(0),
    )?;
    Ok(total)
}

pub fn sum_bump_prices(conn: &Connection, funnel_id: &str, ids: &[String]) -> Result<i64> {
    let ids_json = serde_json::to_string(ids)?;
    let total = conn.query_row(
        "SELECT COALESCE(SUM(price_cents), 0) FROM funnel_bumps
         WHERE funnel_id = ?1 AND id IN (SELECT value FROM json_each(?2))",
        params![funnel_id, ids_json],
        |row| row.get(0),
    )?;
    Ok(total)
}

pub fn create_funnel_affiliate(
    conn: &Connection,
    funnel_id: &str,
    affiliate_id: &str,
    ref_code: &str,
) -> Result<FunnelAffiliate> {
    let id = EntityType::FunnelAffiliate.gen_id();
    conn.execute(
        "INSERT INTO funnel_affiliates (id, funnel_id, affiliate_id, ref_code, status)
         VALUES (?1, ?2, ?3, ?4, 'active')",
        params![&id, funnel_id, affiliate_id, ref_code],
    )?;
    Ok(FunnelAffiliate {
        id,
        funnel_id: funnel_id.to_string(),
        affiliate_id: affiliate_id.to_string(),
        ref_code: ref_code.to_string(),
        status: "active".to_string(),
    })
}

pub fn get_active_affiliate_by_ref_code(
    conn: &Connection,
    funnel_id: &str,
    ref_code: &str,
) -> Result<Option<FunnelAffiliate>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM funnel_affiliates
             WHERE funnel_id = ?1 AND ref_code = ?2 AND status = 'active'",
            FUNNEL_AFFILIATE_COLS
        ),
        &[&funnel_id, &ref_code],
    )
}

pub fn is_active_funnel_affiliate(conn: &Connection, funnel_id: &str, affiliate_id: &str) -> Result<bool> {
    let found: Option<i32> = conn
        .query_row(
            "SELECT 1 FROM funnel_affiliates
             WHERE funnel_id = ?1 AND affiliate_id = ?2 AND status = 'active' LIMIT 1",
            params![funnel_id, affiliate_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

// ============ Funnel Sessions ============

/// Insert a new active session. Returns false when another active session
/// for the same (funnel, visitor) already exists.
pub fn insert_session_if_absent(conn: &Connection, session: &FunnelSession) -> Result<bool> {
    let affected = conn.execute(
        "INSERT OR IGNORE INTO funnel_sessions (uuid, funnel_id, visitor_id, affiliate_id,
            entry_step_id, current_step_id, email, phone, status, utm_source, utm_medium,
            utm_campaign, utm_content, utm_term, referrer, ip_address, user_agent, started_at,
            last_activity_at, converted_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
            ?18, ?19, ?20)",
        params![
            &session.uuid,
            &session.funnel_id,
            &session.visitor_id,
            &session.affiliate_id,
            &session.entry_step_id,
            &session.current_step_id,
            &session.email,
            &session.phone,
            session.status.as_str(),
            &session.utm.utm_source,
            &session.utm.utm_medium,
            &session.utm.utm_campaign,
            &session.utm.utm_content,
            &session.utm.utm_term,
            &session.referrer,
            &session.ip_address,
            &session.user_agent,
            session.started_at,
            session.last_activity_at,
            session.converted_at,
        ],
    )?;
    Ok(affected > 0)
}

pub fn get_session(conn: &Connection, uuid: &str) -> Result<Option<FunnelSession>> {
    query_one(
        conn,
        &format!("SELECT {} FROM funnel_sessions WHERE uuid = ?1", SESSION_COLS),
        &[&uuid],
    )
}

pub fn get_active_session_for_visitor(
    conn: &Connection,
    funnel_id: &str,
    visitor_id: &str,
) -> Result<Option<FunnelSession>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM funnel_sessions
             WHERE funnel_id = ?1 AND visitor_id = ?2 AND status = 'active'",
            SESSION_COLS
        ),
        &[&funnel_id, &visitor_id],
    )
}

/// Expire a visitor's active session in this funnel if it has been idle since `cutoff`.
pub fn expire_stale_session_for_visitor(
    conn: &Connection,
    funnel_id: &str,
    visitor_id: &str,
    cutoff: i64,
) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE funnel_sessions SET status = 'expired'
         WHERE funnel_id = ?1 AND visitor_id = ?2 AND status = 'active' AND last_activity_at < ?3",
        params![funnel_id, visitor_id, cutoff],
    )?;
    Ok(affected > 0)
}

/// Expire every active session idle since `cutoff`. Returns the number expired.
pub fn expire_stale_sessions(conn: &Connection, cutoff: i64) -> Result<usize> {
    let affected = conn.execute(
        "UPDATE funnel_sessions SET status = 'expired'
         WHERE status = 'active' AND last_activity_at < ?1",
        params![cutoff],
    )?;
    Ok(affected)
}

/// Bump activity and optionally move the session to a new current step.
pub fn touch_session(conn: &Connection, uuid: &str, current_step_id: Option<&str>) -> Result<()> {
    conn.execute(
        "UPDATE funnel_sessions
         SET last_activity_at = ?1, current_step_id = COALESCE(?2, current_step_id)
         WHERE uuid = ?3",
        params![now(), current_step_id, uuid],
    )?;
    Ok(())
}

/// Fill in contact fields. `None` leaves the stored value untouched.
pub fn update_session_contact(
    conn: &Connection,
    uuid: &str,
    email: Option<&str>,
    phone: Option<&str>,
) -> Result<()> {
    conn.execute(
        "UPDATE funnel_sessions
         SET email = COALESCE(?1, email), phone = COALESCE(?2, phone), last_activity_at = ?3
         WHERE uuid = ?4",
        params![email, phone, now(), uuid],
    )?;
    Ok(())
}

/// Atomically mark a session converted.
///
/// Returns:
/// - `Ok(true)` if this call converted the session
/// - `Ok(false)` if it was already converted (or does not exist)
pub fn mark_session_converted(conn: &Connection, uuid: &str) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE funnel_sessions SET status = 'converted', converted_at = ?1
         WHERE uuid = ?2 AND status != 'converted'",
        params![now(), uuid],
    )?;
    Ok(affected > 0)
}

/// Record that a step was credited for this session today.
/// Returns false if the step was already credited on `visit_date`.
pub fn try_record_step_visit(
    conn: &Connection,
    session_uuid: &str,
    step_id: &str,
    visit_date: &str,
) -> Result<bool> {
    let affected = conn.execute(
        "INSERT OR IGNORE INTO session_step_visits (session_uuid, step_id, visit_date, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![session_uuid, step_id, visit_date, now()],
    )?;
    Ok(affected > 0)
}

pub fn insert_session_event(
    conn: &Connection,
    session: &FunnelSession,
    step_id: Option<&str>,
    event_name: &str,
    payload: &Value,
) -> Result<SessionEvent> {
    let id = EntityType::SessionEvent.gen_id();
    let now = now();
    conn.execute(
        "INSERT INTO session_events (id, session_uuid, funnel_id, step_id, event_name, payload, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            &id,
            &session.uuid,
            &session.funnel_id,
            step_id,
            event_name,
            payload.to_string(),
            now
        ],
    )?;
    Ok(SessionEvent {
        id,
        session_uuid: session.uuid.clone(),
        funnel_id: session.funnel_id.clone(),
        step_id: step_id.map(String::from),
        event_name: event_name.to_string(),
        payload: payload.clone(),
        created_at: now,
    })
}

pub fn list_session_events(conn: &Connection, session_uuid: &str) -> Result<Vec<SessionEvent>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM session_events WHERE session_uuid = ?1 ORDER BY created_at, rowid",
            SESSION_EVENT_COLS
        ),
        &[&session_uuid],
    )
}

// ============ Carts ============

/// Create the session's cart if it has none yet. Returns whether a row was inserted.
pub fn insert_cart_if_absent(conn: &Connection, session: &FunnelSession) -> Result<bool> {
    let now = now();
    let affected = conn.execute(
        "INSERT OR IGNORE INTO carts (id, session_uuid, funnel_id, step_id, email, phone, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
        params![
            EntityType::Cart.gen_id(),
            &session.uuid,
            &session.funnel_id,
            &session.current_step_id,
            &session.email,
            &session.phone,
            now
        ],
    )?;
    Ok(affected > 0)
}

pub fn get_cart_by_id(conn: &Connection, id: &str) -> Result<Option<Cart>> {
    query_one(
        conn,
        &format!("SELECT {} FROM carts WHERE id = ?1", CART_COLS),
        &[&id],
    )
}

pub fn get_cart_by_session(conn: &Connection, session_uuid: &str) -> Result<Option<Cart>> {
    query_one(
        conn,
        &format!("SELECT {} FROM carts WHERE session_uuid = ?1", CART_COLS),
        &[&session_uuid],
    )
}

/// Persist a new selection and subtotal. Only pending carts are updated.
pub fn update_cart_selection(
    conn: &Connection,
    id: &str,
    product_ids: &[String],
    bump_ids: &[String],
    subtotal_cents: i64,
) -> Result<Option<Cart>> {
    conn.query_row(
        &format!(
            "UPDATE carts SET product_ids = ?1, bump_ids = ?2, subtotal_cents = ?3, updated_at = ?4
             WHERE id = ?5 AND status = 'pending' RETURNING {}",
            CART_COLS
        ),
        params![
            serde_json::to_string(product_ids)?,
            serde_json::to_string(bump_ids)?,
            subtotal_cents,
            now(),
            id
        ],
        <Cart as super::FromRow>::from_row,
    )
    .optional()
    .map_err(Into::into)
}

pub fn update_cart_contact(
    conn: &Connection,
    id: &str,
    email: Option<&str>,
    phone: Option<&str>,
) -> Result<()> {
    conn.execute(
        "UPDATE carts SET email = COALESCE(?1, email), phone = COALESCE(?2, phone), updated_at = ?3
         WHERE id = ?4",
        params![email, phone, now(), id],
    )?;
    Ok(())
}

/// Atomically mark a pending cart as recovered by the given order.
///
/// Returns:
/// - `Ok(true)` if this call recovered the cart
/// - `Ok(false)` if it was already recovered
pub fn try_mark_cart_recovered(conn: &Connection, id: &str, order_id: &str) -> Result<bool> {
    let now = now();
    let affected = conn.execute(
        "UPDATE carts SET status = 'recovered', recovered_order_id = ?1, recovered_at = ?2, updated_at = ?2
         WHERE id = ?3 AND status = 'pending'",
        params![order_id, now, id],
    )?;
    Ok(affected > 0)
}

// ============ Orders ============

pub fn create_order(conn: &Connection, kind: OrderKind, input: &CreateOrder) -> Result<Order> {
    let id = match kind {
        OrderKind::Product => EntityType::ProductOrder.gen_id(),
        OrderKind::Subscription => EntityType::SubscriptionOrder.gen_id(),
    };
    let now = now();
    conn.execute(
        &format!(
            "INSERT INTO {} (id, order_number, total_cents, currency, status, payment_status,
                metadata, conversion_tracked, email, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 'pending', 'unpaid', ?5, 0, ?6, ?7, ?7)",
            kind.table()
        ),
        params![
            &id,
            &input.order_number,
            input.total_cents,
            &input.currency,
            serde_json::to_string(&input.metadata)?,
            &input.email,
            now
        ],
    )?;
    Ok(Order {
        id,
        order_number: input.order_number.clone(),
        transaction_id: None,
        total_cents: input.total_cents,
        currency: input.currency.clone(),
        status: OrderStatus::Pending,
        payment_status: PaymentStatus::Unpaid,
        payment_channel: None,
        metadata: input.metadata.clone(),
        conversion_tracked: false,
        email: input.email.clone(),
        created_at: now,
        updated_at: now,
        paid_at: None,
    })
}

pub fn get_order_by_id(conn: &Connection, kind: OrderKind, id: &str) -> Result<Option<Order>> {
    query_one(
        conn,
        &format!("SELECT {} FROM {} WHERE id = ?1", ORDER_COLS, kind.table()),
        &[&id],
    )
}

pub fn get_order_by_number(
    conn: &Connection,
    kind: OrderKind,
    order_number: &str,
) -> Result<Option<Order>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM {} WHERE order_number = ?1",
            ORDER_COLS,
            kind.table()
        ),
        &[&order_number],
    )
}

/// Look an order number up in each order table in `OrderKind::LOOKUP_ORDER`.
pub fn find_order_by_number(conn: &Connection, order_number: &str) -> Result<Option<OrderRef>> {
    for kind in OrderKind::LOOKUP_ORDER {
        if let Some(order) = get_order_by_number(conn, kind, order_number)? {
            return Ok(Some(OrderRef::new(kind, order)));
        }
    }
    Ok(None)
}

/// Compare-and-set status change for one order.
pub struct OrderTransition<'a> {
    pub kind: OrderKind,
    pub order_id: &'a str,
    /// Status and transaction id the caller observed.
    pub from: OrderStatus,
    pub from_transaction_id: Option<&'a str>,
    pub to: OrderStatus,
    /// Replaces the stored transaction id when present.
    pub transaction_id: Option<&'a str>,
    pub channel: PaymentChannel,
}

/// Apply a status transition only if the row still holds the observed
/// (status, transaction_id) pair.
///
/// Returns:
/// - `Ok(true)` if this call applied the transition
/// - `Ok(false)` if a concurrent writer changed the order first
pub fn try_transition_order(conn: &Connection, t: &OrderTransition<'_>) -> Result<bool> {
    let now = now();
    let affected = conn.execute(
        &format!(
            "UPDATE {} SET status = ?1, payment_status = ?2,
                transaction_id = COALESCE(?3, transaction_id), payment_channel = ?4,
                updated_at = ?5, paid_at = CASE WHEN ?1 = 'paid' THEN ?5 ELSE paid_at END
             WHERE id = ?6 AND status = ?7 AND transaction_id IS ?8",
            t.kind.table()
        ),
        params![
            t.to.as_str(),
            t.to.payment_status().as_str(),
            t.transaction_id,
            t.channel.as_str(),
            now,
            t.order_id,
            t.from.as_str(),
            t.from_transaction_id
        ],
    )?;
    Ok(affected > 0)
}

/// Atomically claim the one-time conversion side effects for an order.
///
/// Returns:
/// - `Ok(true)` if this call flipped `conversion_tracked` from 0 to 1
/// - `Ok(false)` if the conversion was already tracked
pub fn try_claim_conversion(conn: &Connection, kind: OrderKind, order_id: &str) -> Result<bool> {
    let affected = conn.execute(
        &format!(
            "UPDATE {} SET conversion_tracked = 1, updated_at = ?1
             WHERE id = ?2 AND conversion_tracked = 0",
            kind.table()
        ),
        params![now(), order_id],
    )?;
    Ok(affected > 0)
}

/// Set one metadata key in SQL, leaving every other key as stored.
pub fn merge_order_metadata(
    conn: &Connection,
    kind: OrderKind,
    order_id: &str,
    key: &str,
    value: &str,
) -> Result<bool> {
    if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(AppError::Internal(format!("invalid metadata key: {}", key)));
    }
    let affected = conn.execute(
        &format!(
            "UPDATE {} SET metadata = json_set(COALESCE(metadata, '{{}}'), '$.' || ?1, ?2),
                updated_at = ?3
             WHERE id = ?4",
            kind.table()
        ),
        params![key, value, now(), order_id],
    )?;
    Ok(affected > 0)
}

// ============ Funnel Orders ============

pub struct NewFunnelOrder<'a> {
    pub funnel_id: &'a str,
    pub step_id: Option<&'a str>,
    pub session_uuid: Option<&'a str>,
    pub order_kind: OrderKind,
    pub order_id: &'a str,
    pub order_number: &'a str,
    pub revenue_cents: i64,
    pub affiliate_id: Option<&'a str>,
}

pub fn create_funnel_order(conn: &Connection, input: &NewFunnelOrder<'_>) -> Result<FunnelOrder> {
    let id = EntityType::FunnelOrder.gen_id();
    let now = now();
    conn.execute(
        "INSERT INTO funnel_orders (id, funnel_id, step_id, session_uuid, order_kind, order_id,
            order_number, revenue_cents, affiliate_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            &id,
            input.funnel_id,
            input.step_id,
            input.session_uuid,
            input.order_kind.as_str(),
            input.order_id,
            input.order_number,
            input.revenue_cents,
            input.affiliate_id,
            now
        ],
    )?;
    Ok(FunnelOrder {
        id,
        funnel_id: input.funnel_id.to_string(),
        step_id: input.step_id.map(String::from),
        session_uuid: input.session_uuid.map(String::from),
        order_kind: input.order_kind,
        order_id: input.order_id.to_string(),
        order_number: input.order_number.to_string(),
        revenue_cents: input.revenue_cents,
        affiliate_id: input.affiliate_id.map(String::from),
        created_at: now,
    })
}

pub fn get_funnel_order_for_order(
    conn: &Connection,
    kind: OrderKind,
    order_id: &str,
) -> Result<Option<FunnelOrder>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM funnel_orders WHERE order_kind = ?1 AND order_id = ?2",
            FUNNEL_ORDER_COLS
        ),
        &[&kind.as_str(), &order_id],
    )
}

// ============ Daily Stats ============

/// Create the zeroed funnel-level row for `stat_date` if missing.
pub fn ensure_funnel_stats_row(conn: &Connection, funnel_id: &str, stat_date: &str) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO funnel_daily_stats (funnel_id, stat_date) VALUES (?1, ?2)",
        params![funnel_id, stat_date],
    )?;
    Ok(())
}

pub fn ensure_step_stats_row(
    conn: &Connection,
    funnel_id: &str,
    step_id: &str,
    stat_date: &str,
) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO funnel_step_daily_stats (funnel_id, step_id, stat_date)
         VALUES (?1, ?2, ?3)",
        params![funnel_id, step_id, stat_date],
    )?;
    Ok(())
}

pub fn get_funnel_stats(conn: &Connection, funnel_id: &str, stat_date: &str) -> Result<Option<DailyCounter>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM funnel_daily_stats WHERE funnel_id = ?1 AND stat_date = ?2",
            FUNNEL_STATS_COLS
        ),
        &[&funnel_id, &stat_date],
    )
}

pub fn get_step_stats(
    conn: &Connection,
    funnel_id: &str,
    step_id: &str,
    stat_date: &str,
) -> Result<Option<DailyCounter>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM funnel_step_daily_stats
             WHERE funnel_id = ?1 AND step_id = ?2 AND stat_date = ?3",
            STEP_STATS_COLS
        ),
        &[&funnel_id, &step_id, &stat_date],
    )
}

/// Additive update of the funnel-level row. Never read-modify-write.
pub fn add_funnel_stats(
    conn: &Connection,
    funnel_id: &str,
    stat_date: &str,
    delta: &CounterDelta,
) -> Result<()> {
    ensure_funnel_stats_row(conn, funnel_id, stat_date)?;
    conn.execute(
        "UPDATE funnel_daily_stats
         SET visitors = visitors + ?1, pageviews = pageviews + ?2,
             conversions = conversions + ?3, revenue_cents = revenue_cents + ?4
         WHERE funnel_id = ?5 AND stat_date = ?6",
        params![
            delta.visitors,
            delta.pageviews,
            delta.conversions,
            delta.revenue_cents,
            funnel_id,
            stat_date
        ],
    )?;
    Ok(())
}

pub fn add_step_stats(
    conn: &Connection,
    funnel_id: &str,
    step_id: &str,
    stat_date: &str,
    delta: &CounterDelta,
) -> Result<()> {
    ensure_step_stats_row(conn, funnel_id, step_id, stat_date)?;
    conn.execute(
        "UPDATE funnel_step_daily_stats
         SET visitors = visitors + ?1, pageviews = pageviews + ?2,
             conversions = conversions + ?3, revenue_cents = revenue_cents + ?4
         WHERE funnel_id = ?5 AND step_id = ?6 AND stat_date = ?7",
        params![
            delta.visitors,
            delta.pageviews,
            delta.conversions,
            delta.revenue_cents,
            funnel_id,
            step_id,
            stat_date
        ],
    )?;
    Ok(())
}

/// Funnel-level rows for `from..=to`, oldest first.
pub fn list_funnel_stats(
    conn: &Connection,
    funnel_id: &str,
    from: &str,
    to: &str,
) -> Result<Vec<DailyCounter>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM funnel_daily_stats
             WHERE funnel_id = ?1 AND stat_date BETWEEN ?2 AND ?3 ORDER BY stat_date",
            FUNNEL_STATS_COLS
        ),
        &[&funnel_id, &from, &to],
    )
}

pub fn list_step_stats(
    conn: &Connection,
    funnel_id: &str,
    from: &str,
    to: &str,
) -> Result<Vec<DailyCounter>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM funnel_step_daily_stats
             WHERE funnel_id = ?1 AND stat_date BETWEEN ?2 AND ?3 ORDER BY stat_date, step_id",
            STEP_STATS_COLS
        ),
        &[&funnel_id, &from, &to],
    )
}

// ============ Affiliate Conversions ============

pub struct NewAffiliateConversion<'a> {
    pub funnel_id: &'a str,
    pub affiliate_id: &'a str,
    pub session_uuid: &'a str,
    pub order_kind: OrderKind,
    pub order_id: &'a str,
    pub revenue_cents: i64,
}

/// Record affiliate credit. Returns false if the order was already credited.
pub fn try_record_affiliate_conversion(
    conn: &Connection,
    input: &NewAffiliateConversion<'_>,
) -> Result<bool> {
    let affected = conn.execute(
        "INSERT OR IGNORE INTO affiliate_conversions (id, funnel_id, affiliate_id, session_uuid,
            order_kind, order_id, revenue_cents, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            EntityType::AffiliateConversion.gen_id(),
            input.funnel_id,
            input.affiliate_id,
            input.session_uuid,
            input.order_kind.as_str(),
            input.order_id,
            input.revenue_cents,
            now()
        ],
    )?;
    Ok(affected > 0)
}

pub fn list_affiliate_conversions(
    conn: &Connection,
    funnel_id: &str,
) -> Result<Vec<AffiliateConversion>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM affiliate_conversions WHERE funnel_id = ?1 ORDER BY created_at, rowid",
            AFFILIATE_CONVERSION_COLS
        ),
        &[&funnel_id],
    )
}

// ============ Webhook Event Deduplication ============

/// Whether this provider event id was already handled.
pub fn webhook_event_exists(conn: &Connection, provider: &str, event_id: &str) -> Result<bool> {
    let exists = conn
        .query_row(
            "SELECT 1 FROM webhook_events WHERE provider = ?1 AND event_id = ?2",
            params![provider, event_id],
            |_| Ok(()),
        )
        .optional()?
        .is_some();
    Ok(exists)
}

/// Atomically record a webhook event, returning true if this is a new event.
/// Returns false if the event was already processed.
pub fn try_record_webhook_event(conn: &Connection, provider: &str, event_id: &str) -> Result<bool> {
    let affected = conn.execute(
        "INSERT OR IGNORE INTO webhook_events (provider, event_id, created_at) VALUES (?1, ?2, ?3)",
        params![provider, event_id, now()],
    )?;
    Ok(affected > 0)
}

/// Purge webhook events older than the retention period. Returns the number deleted.
pub fn purge_old_webhook_events(conn: &Connection, retention_days: i64) -> Result<usize> {
    let cutoff = now() - (retention_days * 86400);
    let deleted = conn.execute(
        "DELETE FROM webhook_events WHERE created_at < ?1",
        params![cutoff],
    )?;
    Ok(deleted)
}
