//! Row mapping trait and helpers for reducing boilerplate in queries.
//!
//! Models implement `FromRow` to describe how they are built from a row
//! selected with the matching `*_COLS` constant.

use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, ToSql};

use crate::models::*;

/// Parse a string column into an enum type, converting parse errors to rusqlite errors.
fn parse_enum<T: std::str::FromStr>(row: &Row, col: usize, col_name: &str) -> rusqlite::Result<T> {
    row.get::<_, String>(col)?
        .parse::<T>()
        .map_err(|_| rusqlite::Error::InvalidColumnType(col, col_name.to_string(), Type::Text))
}

fn parse_opt_enum<T: std::str::FromStr>(
    row: &Row,
    col: usize,
    col_name: &str,
) -> rusqlite::Result<Option<T>> {
    match row.get::<_, Option<String>>(col)? {
        Some(s) => s
            .parse::<T>()
            .map(Some)
            .map_err(|_| rusqlite::Error::InvalidColumnType(col, col_name.to_string(), Type::Text)),
        None => Ok(None),
    }
}

/// Parse a JSON text column.
fn parse_json<T: serde::de::DeserializeOwned>(row: &Row, col: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(col)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(col, Type::Text, Box::new(e)))
}

/// Trait for constructing a type from a database row.
pub trait FromRow: Sized {
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

/// Query for a single optional result.
pub fn query_one<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Option<T>> {
    conn.query_row(sql, params, T::from_row)
        .optional()
        .map_err(Into::into)
}

/// Query for multiple results.
pub fn query_all<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, T::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ============ SQL SELECT Constants ============

pub const FUNNEL_COLS: &str =
    "id, slug, name, status, pixel_id, pixel_access_token, created_at";

pub const FUNNEL_STEP_COLS: &str = "id, funnel_id, slug, step_type, sort_order";

pub const FUNNEL_PRODUCT_COLS: &str = "id, funnel_id, step_id, name, funnel_price_cents";

pub const FUNNEL_BUMP_COLS: &str = "id, funnel_id, step_id, name, price_cents";

pub const FUNNEL_AFFILIATE_COLS: &str = "id, funnel_id, affiliate_id, ref_code, status";

pub const SESSION_COLS: &str = "uuid, funnel_id, visitor_id, affiliate_id, entry_step_id, current_step_id, email, phone, status, utm_source, utm_medium, utm_campaign, utm_content, utm_term, referrer, ip_address, user_agent, started_at, last_activity_at, converted_at";

pub const SESSION_EVENT_COLS: &str =
    "id, session_uuid, funnel_id, step_id, event_name, payload, created_at";

pub const CART_COLS: &str = "id, session_uuid, funnel_id, step_id, product_ids, bump_ids, subtotal_cents, email, phone, status, recovered_order_id, recovered_at, created_at, updated_at";

/// Shared by `product_orders` and `subscription_orders`.
pub const ORDER_COLS: &str = "id, order_number, transaction_id, total_cents, currency, status, payment_status, payment_channel, metadata, conversion_tracked, email, created_at, updated_at, paid_at";

pub const FUNNEL_ORDER_COLS: &str = "id, funnel_id, step_id, session_uuid, order_kind, order_id, order_number, revenue_cents, affiliate_id, created_at";

pub const FUNNEL_STATS_COLS: &str =
    "funnel_id, NULL, stat_date, visitors, pageviews, conversions, revenue_cents";

pub const STEP_STATS_COLS: &str =
    "funnel_id, step_id, stat_date, visitors, pageviews, conversions, revenue_cents";

pub const AFFILIATE_CONVERSION_COLS: &str =
    "id, funnel_id, affiliate_id, session_uuid, order_kind, order_id, revenue_cents, created_at";

// ============ FromRow Implementations ============

impl FromRow for Funnel {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Funnel {
            id: row.get(0)?,
            slug: row.get(1)?,
            name: row.get(2)?,
            status: row.get(3)?,
            pixel_id: row.get(4)?,
            pixel_access_token: row.get(5)?,
            created_at: row.get(6)?,
        })
    }
}

impl FromRow for FunnelStep {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(FunnelStep {
            id: row.get(0)?,
            funnel_id: row.get(1)?,
            slug: row.get(2)?,
            step_type: parse_enum(row, 3, "step_type")?,
            sort_order: row.get(4)?,
        })
    }
}

impl FromRow for FunnelProduct {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(FunnelProduct {
            id: row.get(0)?,
            funnel_id: row.get(1)?,
            step_id: row.get(2)?,
            name: row.get(3)?,
            funnel_price_cents: row.get(4)?,
        })
    }
}

impl FromRow for FunnelBump {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(FunnelBump {
            id: row.get(0)?,
            funnel_id: row.get(1)?,
            step_id: row.get(2)?,
            name: row.get(3)?,
            price_cents: row.get(4)?,
        })
    }
}

impl FromRow for FunnelAffiliate {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(FunnelAffiliate {
            id: row.get(0)?,
            funnel_id: row.get(1)?,
            affiliate_id: row.get(2)?,
            ref_code: row.get(3)?,
            status: row.get(4)?,
        })
    }
}

impl FromRow for FunnelSession {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(FunnelSession {
            uuid: row.get(0)?,
            funnel_id: row.get(1)?,
            visitor_id: row.get(2)?,
            affiliate_id: row.get(3)?,
            entry_step_id: row.get(4)?,
            current_step_id: row.get(5)?,
            email: row.get(6)?,
            phone: row.get(7)?,
            status: parse_enum(row, 8, "status")?,
            utm: UtmParams {
                utm_source: row.get(9)?,
                utm_medium: row.get(10)?,
                utm_campaign: row.get(11)?,
                utm_content: row.get(12)?,
                utm_term: row.get(13)?,
            },
            referrer: row.get(14)?,
            ip_address: row.get(15)?,
            user_agent: row.get(16)?,
            started_at: row.get(17)?,
            last_activity_at: row.get(18)?,
            converted_at: row.get(19)?,
        })
    }
}

impl FromRow for SessionEvent {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(SessionEvent {
            id: row.get(0)?,
            session_uuid: row.get(1)?,
            funnel_id: row.get(2)?,
            step_id: row.get(3)?,
            event_name: row.get(4)?,
            payload: parse_json(row, 5)?,
            created_at: row.get(6)?,
        })
    }
}

impl FromRow for Cart {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Cart {
            id: row.get(0)?,
            session_uuid: row.get(1)?,
            funnel_id: row.get(2)?,
            step_id: row.get(3)?,
            product_ids: parse_json(row, 4)?,
            bump_ids: parse_json(row, 5)?,
            subtotal_cents: row.get(6)?,
            email: row.get(7)?,
            phone: row.get(8)?,
            status: parse_enum(row, 9, "status")?,
            recovered_order_id: row.get(10)?,
            recovered_at: row.get(11)?,
            created_at: row.get(12)?,
            updated_at: row.get(13)?,
        })
    }
}

impl FromRow for Order {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Order {
            id: row.get(0)?,
            order_number: row.get(1)?,
            transaction_id: row.get(2)?,
            total_cents: row.get(3)?,
            currency: row.get(4)?,
            status: parse_enum(row, 5, "status")?,
            payment_status: parse_enum(row, 6, "payment_status")?,
            payment_channel: parse_opt_enum(row, 7, "payment_channel")?,
            metadata: parse_json(row, 8)?,
            conversion_tracked: row.get::<_, i32>(9)? != 0,
            email: row.get(10)?,
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
            paid_at: row.get(13)?,
        })
    }
}

impl FromRow for FunnelOrder {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(FunnelOrder {
            id: row.get(0)?,
            funnel_id: row.get(1)?,
            step_id: row.get(2)?,
            session_uuid: row.get(3)?,
            order_kind: parse_enum(row, 4, "order_kind")?,
            order_id: row.get(5)?,
            order_number: row.get(6)?,
            revenue_cents: row.get(7)?,
            affiliate_id: row.get(8)?,
            created_at: row.get(9)?,
        })
    }
}

impl FromRow for DailyCounter {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(DailyCounter {
            funnel_id: row.get(0)?,
            step_id: row.get(1)?,
            stat_date: row.get(2)?,
            visitors: row.get(3)?,
            pageviews: row.get(4)?,
            conversions: row.get(5)?,
            revenue_cents: row.get(6)?,
        })
    }
}

impl FromRow for AffiliateConversion {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(AffiliateConversion {
            id: row.get(0)?,
            funnel_id: row.get(1)?,
            affiliate_id: row.get(2)?,
            session_uuid: row.get(3)?,
            order_kind: parse_enum(row, 4, "order_kind")?,
            order_id: row.get(5)?,
            revenue_cents: row.get(6)?,
            created_at: row.get(7)?,
        })
    }
}
