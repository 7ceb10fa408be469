//! Funnel session lifecycle: resume-or-create, pageview credit, telemetry events.

use rusqlite::{Connection, TransactionBehavior};
use serde_json::Value;
use uuid::Uuid;

use super::ledger;
use crate::db::queries;
use crate::error::{AppError, Result};
use crate::models::{Funnel, FunnelSession, FunnelStep, SessionStatus, VisitContext};

/// Session resolved for an incoming request.
#[derive(Debug, Clone)]
pub struct TrackedSession {
    pub session: FunnelSession,
    /// True when this request created the session.
    pub is_new: bool,
}

impl TrackedSession {
    pub fn affiliate_id(&self) -> Option<&str> {
        self.session.affiliate_id.as_deref()
    }
}

/// Resume the visitor's live session for `funnel` or start a new one.
///
/// A cookie naming an unknown, expired, converted, stale or foreign session
/// silently falls back to creation. Concurrent first requests from one
/// visitor race on the active-session unique index; the loser reuses the winner.
pub fn get_or_create_session(
    conn: &Connection,
    funnel: &Funnel,
    cookie_session_uuid: Option<&str>,
    visitor_id: Option<&str>,
    ctx: &VisitContext,
    ttl_minutes: i64,
) -> Result<TrackedSession> {
    let cutoff = queries::now() - ttl_minutes * 60;

    if let Some(uuid) = cookie_session_uuid.filter(|s| !s.is_empty()) {
        match queries::get_session(conn, uuid)? {
            Some(session)
                if session.funnel_id == funnel.id
                    && session.status == SessionStatus::Active
                    && session.last_activity_at >= cutoff =>
            {
                return resume(conn, session);
            }
            _ => tracing::debug!(session = %uuid, "Session cookie not resumable, starting fresh"),
        }
    }

    let visitor_id = visitor_id
        .filter(|v| !v.is_empty())
        .map(String::from)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    if queries::expire_stale_session_for_visitor(conn, &funnel.id, &visitor_id, cutoff)? {
        tracing::debug!(funnel = %funnel.slug, visitor = %visitor_id, "Expired stale session");
    }
    if let Some(existing) = queries::get_active_session_for_visitor(conn, &funnel.id, &visitor_id)? {
        return resume(conn, existing);
    }

    let now = queries::now();
    let session = FunnelSession {
        uuid: Uuid::new_v4().to_string(),
        funnel_id: funnel.id.clone(),
        visitor_id,
        affiliate_id: resolve_affiliate(conn, funnel, ctx)?,
        entry_step_id: ctx.entry_step_id.clone(),
        current_step_id: ctx.entry_step_id.clone(),
        email: None,
        phone: None,
        status: SessionStatus::Active,
        utm: ctx.utm.clone(),
        referrer: ctx.referrer.clone(),
        ip_address: ctx.ip_address.clone(),
        user_agent: ctx.user_agent.clone(),
        started_at: now,
        last_activity_at: now,
        converted_at: None,
    };

    if queries::insert_session_if_absent(conn, &session)? {
        ledger::increment_visitors(conn, &funnel.id)?;
        tracing::info!(
            funnel = %funnel.slug,
            session = %session.uuid,
            affiliate = ?session.affiliate_id,
            "Started funnel session"
        );
        return Ok(TrackedSession {
            session,
            is_new: true,
        });
    }

    // Lost the race against a concurrent first request from the same visitor.
    let winner = queries::get_active_session_for_visitor(conn, &funnel.id, &session.visitor_id)?
        .ok_or_else(|| AppError::Internal("active session vanished after insert conflict".into()))?;
    resume(conn, winner)
}

/// Bump activity on an existing session, counting a new daily visitor when
/// the previous activity fell on an earlier day.
fn resume(conn: &Connection, mut session: FunnelSession) -> Result<TrackedSession> {
    // Must be evaluated before the activity timestamp moves.
    let first_visit_today =
        ledger::local_date(session.last_activity_at).is_some_and(|d| d < ledger::today());

    queries::touch_session(conn, &session.uuid, None)?;
    session.last_activity_at = queries::now();

    if first_visit_today {
        ledger::increment_visitors(conn, &session.funnel_id)?;
    }

    Ok(TrackedSession {
        session,
        is_new: false,
    })
}

/// Affiliate cookie valid for this funnel wins, then an active `ref` code.
fn resolve_affiliate(conn: &Connection, funnel: &Funnel, ctx: &VisitContext) -> Result<Option<String>> {
    if let Some(affiliate_id) = ctx.affiliate_cookie.as_deref().filter(|s| !s.is_empty()) {
        if queries::is_active_funnel_affiliate(conn, &funnel.id, affiliate_id)? {
            return Ok(Some(affiliate_id.to_string()));
        }
    }
    if let Some(code) = ctx.ref_code.as_deref().filter(|s| !s.is_empty()) {
        match queries::get_active_affiliate_by_ref_code(conn, &funnel.id, code)? {
            Some(aff) => return Ok(Some(aff.affiliate_id)),
            None => tracing::debug!(funnel = %funnel.slug, ref_code = %code, "Unknown referral code"),
        }
    }
    Ok(None)
}

/// Credit a step view. Funnel and step pageviews plus step visitors are
/// counted once per session, step and day. Returns whether credit was given.
pub fn track_pageview(conn: &mut Connection, session: &FunnelSession, step: &FunnelStep) -> Result<bool> {
    if step.funnel_id != session.funnel_id {
        return Err(AppError::BadRequest("step does not belong to this funnel".into()));
    }

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    queries::touch_session(&tx, &session.uuid, Some(&step.id))?;

    let today = ledger::today();
    if !queries::try_record_step_visit(&tx, &session.uuid, &step.id, &ledger::date_key(today))? {
        tx.commit()?;
        tracing::debug!(session = %session.uuid, step = %step.slug, "Step already credited today");
        return Ok(false);
    }

    ledger::increment_pageviews_on(&tx, &session.funnel_id, Some(&step.id), today)?;
    ledger::increment_step_visitors_on(&tx, &session.funnel_id, &step.id, today)?;
    tx.commit()?;
    Ok(true)
}

/// Append a telemetry event. Callers log and drop failures.
pub fn track_event(
    conn: &Connection,
    session: &FunnelSession,
    event_name: &str,
    payload: Value,
    step_id: Option<&str>,
) -> Result<()> {
    queries::insert_session_event(conn, session, step_id, event_name, &payload)?;
    Ok(())
}

pub fn update_contact(
    conn: &Connection,
    session: &FunnelSession,
    email: Option<&str>,
    phone: Option<&str>,
) -> Result<()> {
    let email = email.map(str::trim).filter(|s| !s.is_empty());
    let phone = phone.map(str::trim).filter(|s| !s.is_empty());
    if email.is_none() && phone.is_none() {
        return Ok(());
    }
    queries::update_session_contact(conn, &session.uuid, email, phone)
}

/// Idempotent: returns false when the session was already converted.
pub fn mark_converted(conn: &Connection, session_uuid: &str) -> Result<bool> {
    let converted = queries::mark_session_converted(conn, session_uuid)?;
    if converted {
        tracing::info!(session = %session_uuid, "Funnel session converted");
    }
    Ok(converted)
}

/// Expire active sessions idle past the TTL. Used by the background sweep.
pub fn expire_idle_sessions(conn: &Connection, ttl_minutes: i64) -> Result<usize> {
    queries::expire_stale_sessions(conn, queries::now() - ttl_minutes * 60)
}
