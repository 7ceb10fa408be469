//! Daily funnel and step counters plus affiliate credit.
//!
//! Counter rows are created lazily and only ever grow through additive
//! `UPDATE ... SET x = x + ?` statements, so concurrent requests never lose
//! increments. Days are calendar dates in the server's local time zone.

use chrono::{DateTime, Local, NaiveDate};
use rusqlite::Connection;
use serde::Serialize;

use crate::db::queries;
use crate::error::{AppError, Result};
use crate::models::{CounterDelta, DailyCounter, FunnelSession, PaymentRecord};

pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// `YYYY-MM-DD` key used by the stats tables.
pub fn date_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Local calendar date of a Unix timestamp.
pub fn local_date(timestamp: i64) -> Option<NaiveDate> {
    DateTime::from_timestamp(timestamp, 0).map(|dt| dt.with_timezone(&Local).date_naive())
}

pub fn get_or_create_for_today(
    conn: &Connection,
    funnel_id: &str,
    step_id: Option<&str>,
) -> Result<DailyCounter> {
    get_or_create_on(conn, funnel_id, step_id, today())
}

pub fn get_or_create_on(
    conn: &Connection,
    funnel_id: &str,
    step_id: Option<&str>,
    date: NaiveDate,
) -> Result<DailyCounter> {
    let key = date_key(date);
    let counter = match step_id {
        Some(step_id) => {
            queries::ensure_step_stats_row(conn, funnel_id, step_id, &key)?;
            queries::get_step_stats(conn, funnel_id, step_id, &key)?
        }
        None => {
            queries::ensure_funnel_stats_row(conn, funnel_id, &key)?;
            queries::get_funnel_stats(conn, funnel_id, &key)?
        }
    };
    counter.ok_or_else(|| AppError::Internal("daily counter row missing after insert".into()))
}

/// One more unique visitor for the funnel today.
pub fn increment_visitors(conn: &Connection, funnel_id: &str) -> Result<()> {
    increment_visitors_on(conn, funnel_id, today())
}

pub fn increment_visitors_on(conn: &Connection, funnel_id: &str, date: NaiveDate) -> Result<()> {
    queries::add_funnel_stats(conn, funnel_id, &date_key(date), &CounterDelta::visitor())
}

/// Pageview at funnel level and, when known, at step level.
pub fn increment_pageviews(conn: &Connection, funnel_id: &str, step_id: Option<&str>) -> Result<()> {
    increment_pageviews_on(conn, funnel_id, step_id, today())
}

pub fn increment_pageviews_on(
    conn: &Connection,
    funnel_id: &str,
    step_id: Option<&str>,
    date: NaiveDate,
) -> Result<()> {
    let key = date_key(date);
    queries::add_funnel_stats(conn, funnel_id, &key, &CounterDelta::pageview())?;
    if let Some(step_id) = step_id {
        queries::add_step_stats(conn, funnel_id, step_id, &key, &CounterDelta::pageview())?;
    }
    Ok(())
}

pub fn increment_step_visitors(conn: &Connection, funnel_id: &str, step_id: &str) -> Result<()> {
    increment_step_visitors_on(conn, funnel_id, step_id, today())
}

pub fn increment_step_visitors_on(
    conn: &Connection,
    funnel_id: &str,
    step_id: &str,
    date: NaiveDate,
) -> Result<()> {
    queries::add_step_stats(conn, funnel_id, step_id, &date_key(date), &CounterDelta::visitor())
}

/// One conversion worth `revenue_cents`, at funnel level and, when known, step level.
pub fn increment_conversions(
    conn: &Connection,
    funnel_id: &str,
    step_id: Option<&str>,
    revenue_cents: i64,
) -> Result<()> {
    increment_conversions_on(conn, funnel_id, step_id, revenue_cents, today())
}

pub fn increment_conversions_on(
    conn: &Connection,
    funnel_id: &str,
    step_id: Option<&str>,
    revenue_cents: i64,
    date: NaiveDate,
) -> Result<()> {
    let key = date_key(date);
    let delta = CounterDelta::conversion(revenue_cents);
    queries::add_funnel_stats(conn, funnel_id, &key, &delta)?;
    if let Some(step_id) = step_id {
        queries::add_step_stats(conn, funnel_id, step_id, &key, &delta)?;
    }
    Ok(())
}

/// Credit the session's affiliate for an order. Returns false when the
/// session has no affiliate or the order was already credited.
pub fn credit_affiliate(
    conn: &Connection,
    session: &FunnelSession,
    order: &dyn PaymentRecord,
) -> Result<bool> {
    let Some(affiliate_id) = session.affiliate_id.as_deref() else {
        return Ok(false);
    };
    queries::try_record_affiliate_conversion(
        conn,
        &queries::NewAffiliateConversion {
            funnel_id: &session.funnel_id,
            affiliate_id,
            session_uuid: &session.uuid,
            order_kind: order.kind(),
            order_id: order.id(),
            revenue_cents: order.total_cents(),
        },
    )
}

/// Counters for a date range, for analytics views.
#[derive(Debug, Clone, Serialize)]
pub struct DailyReport {
    pub funnel_id: String,
    pub from: String,
    pub to: String,
    pub days: Vec<DailyCounter>,
    pub steps: Vec<DailyCounter>,
    /// Sum over `days`.
    pub totals: DailyCounter,
}

impl DailyReport {
    /// Conversions per visitor, 0.0 when there were no visitors.
    pub fn conversion_rate(&self) -> f64 {
        if self.totals.visitors == 0 {
            0.0
        } else {
            self.totals.conversions as f64 / self.totals.visitors as f64
        }
    }
}

pub fn daily_report(
    conn: &Connection,
    funnel_id: &str,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<DailyReport> {
    if from > to {
        return Err(AppError::BadRequest("report range start is after its end".into()));
    }
    let (from, to) = (date_key(from), date_key(to));
    let days = queries::list_funnel_stats(conn, funnel_id, &from, &to)?;
    let steps = queries::list_step_stats(conn, funnel_id, &from, &to)?;

    let totals = days.iter().fold(
        DailyCounter {
            funnel_id: funnel_id.to_string(),
            ..Default::default()
        },
        |mut acc, day| {
            acc.visitors += day.visitors;
            acc.pageviews += day.pageviews;
            acc.conversions += day.conversions;
            acc.revenue_cents += day.revenue_cents;
            acc
        },
    );

    Ok(DailyReport {
        funnel_id: funnel_id.to_string(),
        from,
        to,
        days,
        steps,
        totals,
    })
}
