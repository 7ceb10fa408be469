#[path = "../common/mod.rs"]
mod common;

use common::*;
use rusqlite::Connection;

const DAY: i64 = 86400;

fn visit(
    conn: &Connection,
    tf: &TestFunnel,
    cookie: Option<&str>,
    visitor: Option<&str>,
    ctx: &VisitContext,
) -> session::TrackedSession {
    session::get_or_create_session(conn, &tf.funnel, cookie, visitor, ctx, SESSION_TTL_MINUTES).unwrap()
}

fn set_last_activity(conn: &Connection, uuid: &str, at: i64) {
    conn.execute(
        "UPDATE funnel_sessions SET last_activity_at = ?1 WHERE uuid = ?2",
        rusqlite::params![at, uuid],
    )
    .unwrap();
}

#[test]
fn test_first_visit_creates_session_and_counts_visitor() {
    let conn = setup_test_db();
    let tf = create_test_funnel(&conn, "launch");
    let ctx = VisitContext {
        ref_code: Some("PARTNER".into()),
        entry_step_id: Some(tf.landing.id.clone()),
        ..visit_context()
    };

    let tracked = visit(&conn, &tf, None, None, &ctx);

    assert!(tracked.is_new);
    let s = &tracked.session;
    assert_eq!(s.status, SessionStatus::Active);
    assert_eq!(s.funnel_id, tf.funnel.id);
    assert_eq!(s.affiliate_id.as_deref(), Some("aff_partner"));
    assert_eq!(tracked.affiliate_id(), Some("aff_partner"));
    assert_eq!(s.entry_step_id.as_deref(), Some(tf.landing.id.as_str()));
    assert!(uuid::Uuid::parse_str(&s.uuid).is_ok());
    assert!(uuid::Uuid::parse_str(&s.visitor_id).is_ok());

    let stored = queries::get_session(&conn, &s.uuid).unwrap().unwrap();
    assert_eq!(stored.utm.utm_source.as_deref(), Some("facebook"));
    assert_eq!(stored.ip_address.as_deref(), Some("203.0.113.7"));

    assert_eq!(funnel_counter_today(&conn, &tf.funnel.id).visitors, 1);
}

#[test]
fn test_cookie_resumes_session_without_new_visitor() {
    let conn = setup_test_db();
    let tf = create_test_funnel(&conn, "launch");

    let first = visit(&conn, &tf, None, None, &visit_context());
    let second = visit(&conn, &tf, Some(&first.session.uuid), None, &visit_context());

    assert!(!second.is_new);
    assert_eq!(second.session.uuid, first.session.uuid);
    assert_eq!(funnel_counter_today(&conn, &tf.funnel.id).visitors, 1);
}

#[test]
fn test_resume_on_a_later_day_counts_a_new_daily_visitor() {
    let conn = setup_test_db();
    let tf = create_test_funnel(&conn, "launch");
    let first = visit(&conn, &tf, None, None, &visit_context());
    set_last_activity(&conn, &first.session.uuid, queries::now() - 2 * DAY);

    let resumed = session::get_or_create_session(
        &conn,
        &tf.funnel,
        Some(&first.session.uuid),
        None,
        &visit_context(),
        7 * 24 * 60,
    )
    .unwrap();

    assert!(!resumed.is_new);
    assert_eq!(resumed.session.uuid, first.session.uuid);
    assert_eq!(funnel_counter_today(&conn, &tf.funnel.id).visitors, 2);

    let stored = queries::get_session(&conn, &first.session.uuid).unwrap().unwrap();
    assert!(stored.last_activity_at >= queries::now() - 5);
}

#[test]
fn test_stale_cookie_starts_fresh_and_expires_old_session() {
    let conn = setup_test_db();
    let tf = create_test_funnel(&conn, "launch");
    let first = visit(&conn, &tf, None, None, &visit_context());
    set_last_activity(&conn, &first.session.uuid, queries::now() - 3 * DAY);

    let next = visit(
        &conn,
        &tf,
        Some(&first.session.uuid),
        Some(&first.session.visitor_id),
        &visit_context(),
    );

    assert!(next.is_new);
    assert_ne!(next.session.uuid, first.session.uuid);
    assert_eq!(next.session.visitor_id, first.session.visitor_id);
    let old = queries::get_session(&conn, &first.session.uuid).unwrap().unwrap();
    assert_eq!(old.status, SessionStatus::Expired);
}

#[test]
fn test_foreign_unknown_or_converted_cookies_fall_back_to_creation() {
    let conn = setup_test_db();
    let tf = create_test_funnel(&conn, "launch");
    let other = create_test_funnel(&conn, "other");

    let foreign = visit(&conn, &other, None, None, &visit_context());
    let from_foreign = visit(&conn, &tf, Some(&foreign.session.uuid), None, &visit_context());
    assert!(from_foreign.is_new);
    assert_eq!(from_foreign.session.funnel_id, tf.funnel.id);

    let unknown = visit(&conn, &tf, Some("not-a-session"), None, &visit_context());
    assert!(unknown.is_new);

    session::mark_converted(&conn, &unknown.session.uuid).unwrap();
    let after_conversion = visit(
        &conn,
        &tf,
        Some(&unknown.session.uuid),
        Some(&unknown.session.visitor_id),
        &visit_context(),
    );
    assert!(after_conversion.is_new);
    assert_ne!(after_conversion.session.uuid, unknown.session.uuid);
}

#[test]
fn test_second_tab_without_cookie_reuses_active_session() {
    let conn = setup_test_db();
    let tf = create_test_funnel(&conn, "launch");

    let first = visit(&conn, &tf, None, Some("visitor-1"), &visit_context());
    let second = visit(&conn, &tf, None, Some("visitor-1"), &visit_context());

    assert!(first.is_new);
    assert!(!second.is_new);
    assert_eq!(second.session.uuid, first.session.uuid);
    assert_eq!(funnel_counter_today(&conn, &tf.funnel.id).visitors, 1);
}

#[test]
fn test_only_one_active_session_per_visitor_can_be_inserted() {
    let conn = setup_test_db();
    let tf = create_test_funnel(&conn, "launch");
    let winner = visit(&conn, &tf, None, Some("visitor-1"), &visit_context()).session;

    let loser = FunnelSession {
        uuid: uuid::Uuid::new_v4().to_string(),
        ..winner.clone()
    };
    assert!(!queries::insert_session_if_absent(&conn, &loser).unwrap());

    let active = queries::get_active_session_for_visitor(&conn, &tf.funnel.id, "visitor-1")
        .unwrap()
        .unwrap();
    assert_eq!(active.uuid, winner.uuid);
}

#[test]
fn test_affiliate_resolution_order() {
    let conn = setup_test_db();
    let tf = create_test_funnel(&conn, "launch");
    let other = queries::create_funnel_affiliate(&conn, &tf.funnel.id, "aff_cookie", "COOKIE").unwrap();

    // Valid cookie wins over the URL code
    let ctx = VisitContext {
        ref_code: Some("PARTNER".into()),
        affiliate_cookie: Some(other.affiliate_id.clone()),
        ..visit_context()
    };
    let s = visit(&conn, &tf, None, Some("v1"), &ctx).session;
    assert_eq!(s.affiliate_id.as_deref(), Some("aff_cookie"));

    // Cookie for an affiliate this funnel does not know falls back to the code
    let ctx = VisitContext {
        ref_code: Some("PARTNER".into()),
        affiliate_cookie: Some("aff_elsewhere".into()),
        ..visit_context()
    };
    let s = visit(&conn, &tf, None, Some("v2"), &ctx).session;
    assert_eq!(s.affiliate_id.as_deref(), Some("aff_partner"));

    // Inactive affiliates are not credited
    set_affiliate_status(&conn, &tf.affiliate.id, "inactive");
    let ctx = VisitContext {
        ref_code: Some("PARTNER".into()),
        ..visit_context()
    };
    let s = visit(&conn, &tf, None, Some("v3"), &ctx).session;
    assert_eq!(s.affiliate_id, None);
}

#[test]
fn test_pageview_is_credited_once_per_step_per_day() {
    let mut conn = setup_test_db();
    let tf = create_test_funnel(&conn, "launch");
    let s = visit(&conn, &tf, None, None, &visit_context()).session;

    assert!(session::track_pageview(&mut conn, &s, &tf.landing).unwrap());
    assert!(!session::track_pageview(&mut conn, &s, &tf.landing).unwrap());
    assert!(session::track_pageview(&mut conn, &s, &tf.checkout).unwrap());

    let funnel_day = funnel_counter_today(&conn, &tf.funnel.id);
    assert_eq!(funnel_day.pageviews, 2);
    let landing_day = step_counter_today(&conn, &tf.funnel.id, &tf.landing.id);
    assert_eq!(landing_day.pageviews, 1);
    assert_eq!(landing_day.visitors, 1);

    let stored = queries::get_session(&conn, &s.uuid).unwrap().unwrap();
    assert_eq!(stored.current_step_id.as_deref(), Some(tf.checkout.id.as_str()));
}

#[test]
fn test_pageview_for_step_of_another_funnel_is_rejected() {
    let mut conn = setup_test_db();
    let tf = create_test_funnel(&conn, "launch");
    let other = create_test_funnel(&conn, "other");
    let s = visit(&conn, &tf, None, None, &visit_context()).session;

    let result = session::track_pageview(&mut conn, &s, &other.landing);
    assert!(matches!(result, Err(AppError::BadRequest(_))));
}

#[test]
fn test_mark_converted_is_idempotent() {
    let conn = setup_test_db();
    let tf = create_test_funnel(&conn, "launch");
    let s = visit(&conn, &tf, None, None, &visit_context()).session;

    assert!(session::mark_converted(&conn, &s.uuid).unwrap());
    assert!(!session::mark_converted(&conn, &s.uuid).unwrap());

    let stored = queries::get_session(&conn, &s.uuid).unwrap().unwrap();
    assert_eq!(stored.status, SessionStatus::Converted);
}

#[test]
fn test_contact_capture_keeps_earlier_values() {
    let conn = setup_test_db();
    let tf = create_test_funnel(&conn, "launch");
    let s = visit(&conn, &tf, None, None, &visit_context()).session;

    session::update_contact(&conn, &s, Some("a@example.com"), None).unwrap();
    session::update_contact(&conn, &s, Some("  "), Some("0123456789")).unwrap();

    let stored = queries::get_session(&conn, &s.uuid).unwrap().unwrap();
    assert_eq!(stored.email.as_deref(), Some("a@example.com"));
    assert_eq!(stored.phone.as_deref(), Some("0123456789"));
}

#[test]
fn test_events_are_appended() {
    let conn = setup_test_db();
    let tf = create_test_funnel(&conn, "launch");
    let s = visit(&conn, &tf, None, None, &visit_context()).session;

    session::track_event(&conn, &s, "video_played", serde_json::json!({"seconds": 30}), Some(&tf.landing.id))
        .unwrap();

    let events = queries::list_session_events(&conn, &s.uuid).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_name, "video_played");
    assert_eq!(events[0].payload["seconds"], 30);
    assert_eq!(events[0].step_id.as_deref(), Some(tf.landing.id.as_str()));
}

#[test]
fn test_idle_sessions_are_expired_by_sweep() {
    let conn = setup_test_db();
    let tf = create_test_funnel(&conn, "launch");
    let idle = visit(&conn, &tf, None, Some("v1"), &visit_context()).session;
    let live = visit(&conn, &tf, None, Some("v2"), &visit_context()).session;
    set_last_activity(&conn, &idle.uuid, queries::now() - 2 * DAY);

    assert_eq!(session::expire_idle_sessions(&conn, SESSION_TTL_MINUTES).unwrap(), 1);

    let idle = queries::get_session(&conn, &idle.uuid).unwrap().unwrap();
    let live = queries::get_session(&conn, &live.uuid).unwrap().unwrap();
    assert_eq!(idle.status, SessionStatus::Expired);
    assert_eq!(live.status, SessionStatus::Active);
}
