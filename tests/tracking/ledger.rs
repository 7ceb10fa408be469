#[path = "../common/mod.rs"]
mod common;

use chrono::{Duration, NaiveDate};
use common::*;

fn day(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

#[test]
fn test_counter_row_starts_at_zero() {
    let conn = setup_test_db();
    let tf = create_test_funnel(&conn, "launch");

    let counter = funnel_counter_today(&conn, &tf.funnel.id);
    assert_eq!(counter.stat_date, ledger::date_key(ledger::today()));
    assert_eq!(counter.step_id, None);
    assert_eq!(
        (counter.visitors, counter.pageviews, counter.conversions, counter.revenue_cents),
        (0, 0, 0, 0)
    );

    // Asking again does not reset or duplicate the row
    ledger::increment_visitors(&conn, &tf.funnel.id).unwrap();
    assert_eq!(funnel_counter_today(&conn, &tf.funnel.id).visitors, 1);
}

#[test]
fn test_pageviews_and_step_visitors() {
    let conn = setup_test_db();
    let tf = create_test_funnel(&conn, "launch");

    ledger::increment_pageviews(&conn, &tf.funnel.id, Some(&tf.landing.id)).unwrap();
    ledger::increment_pageviews(&conn, &tf.funnel.id, None).unwrap();
    ledger::increment_step_visitors(&conn, &tf.funnel.id, &tf.landing.id).unwrap();

    let funnel_day = funnel_counter_today(&conn, &tf.funnel.id);
    assert_eq!(funnel_day.pageviews, 2);
    assert_eq!(funnel_day.visitors, 0);

    let step_day = step_counter_today(&conn, &tf.funnel.id, &tf.landing.id);
    assert_eq!(step_day.pageviews, 1);
    assert_eq!(step_day.visitors, 1);
    assert_eq!(step_day.step_id.as_deref(), Some(tf.landing.id.as_str()));
}

#[test]
fn test_conversions_update_funnel_and_step_rows() {
    let conn = setup_test_db();
    let tf = create_test_funnel(&conn, "launch");

    ledger::increment_conversions(&conn, &tf.funnel.id, Some(&tf.checkout.id), 11800).unwrap();
    ledger::increment_conversions(&conn, &tf.funnel.id, None, 4900).unwrap();

    let funnel_day = funnel_counter_today(&conn, &tf.funnel.id);
    assert_eq!(funnel_day.conversions, 2);
    assert_eq!(funnel_day.revenue_cents, 16700);

    let step_day = step_counter_today(&conn, &tf.funnel.id, &tf.checkout.id);
    assert_eq!(step_day.conversions, 1);
    assert_eq!(step_day.revenue_cents, 11800);
}

#[test]
fn test_daily_report_sums_the_range() {
    let conn = setup_test_db();
    let tf = create_test_funnel(&conn, "launch");
    let id = &tf.funnel.id;

    for _ in 0..4 {
        ledger::increment_visitors_on(&conn, id, day("2026-03-01")).unwrap();
    }
    ledger::increment_pageviews_on(&conn, id, Some(&tf.landing.id), day("2026-03-01")).unwrap();
    ledger::increment_conversions_on(&conn, id, Some(&tf.checkout.id), 9900, day("2026-03-01")).unwrap();
    for _ in 0..4 {
        ledger::increment_visitors_on(&conn, id, day("2026-03-02")).unwrap();
    }
    ledger::increment_conversions_on(&conn, id, None, 4900, day("2026-03-02")).unwrap();
    // Outside the range
    ledger::increment_visitors_on(&conn, id, day("2026-03-05")).unwrap();

    let report = ledger::daily_report(&conn, id, day("2026-03-01"), day("2026-03-02")).unwrap();

    assert_eq!(report.from, "2026-03-01");
    assert_eq!(report.to, "2026-03-02");
    assert_eq!(report.days.len(), 2);
    assert_eq!(report.totals.visitors, 8);
    assert_eq!(report.totals.pageviews, 1);
    assert_eq!(report.totals.conversions, 2);
    assert_eq!(report.totals.revenue_cents, 14800);
    assert!((report.conversion_rate() - 0.25).abs() < f64::EPSILON);

    let step_ids: Vec<_> = report.steps.iter().filter_map(|s| s.step_id.clone()).collect();
    assert!(step_ids.contains(&tf.landing.id));
    assert!(step_ids.contains(&tf.checkout.id));
}

#[test]
fn test_daily_report_without_traffic() {
    let conn = setup_test_db();
    let tf = create_test_funnel(&conn, "launch");
    let today = ledger::today();

    let report = ledger::daily_report(&conn, &tf.funnel.id, today - Duration::days(7), today).unwrap();
    assert!(report.days.is_empty());
    assert_eq!(report.conversion_rate(), 0.0);
}

#[test]
fn test_daily_report_rejects_inverted_range() {
    let conn = setup_test_db();
    let tf = create_test_funnel(&conn, "launch");

    let result = ledger::daily_report(&conn, &tf.funnel.id, day("2026-03-02"), day("2026-03-01"));
    assert!(matches!(result, Err(AppError::BadRequest(_))));
}

#[test]
fn test_affiliate_is_credited_once_per_order() {
    let mut conn = setup_test_db();
    let tf = create_test_funnel(&conn, "launch");
    let (s, order) = create_test_order(&mut conn, &tf, Some("PARTNER"));

    assert!(ledger::credit_affiliate(&conn, &s, &order).unwrap());
    assert!(!ledger::credit_affiliate(&conn, &s, &order).unwrap());

    let credits = queries::list_affiliate_conversions(&conn, &tf.funnel.id).unwrap();
    assert_eq!(credits.len(), 1);
    assert_eq!(credits[0].affiliate_id, "aff_partner");
    assert_eq!(credits[0].revenue_cents, 11800);
    assert_eq!(credits[0].order_id, order.id());
}

#[test]
fn test_no_credit_without_affiliate() {
    let mut conn = setup_test_db();
    let tf = create_test_funnel(&conn, "launch");
    let (s, order) = create_test_order(&mut conn, &tf, None);

    assert!(!ledger::credit_affiliate(&conn, &s, &order).unwrap());
    assert!(queries::list_affiliate_conversions(&conn, &tf.funnel.id).unwrap().is_empty());
}
