//! Callback vs browser-return ordering and the unverified-return policy

#[path = "../common/mod.rs"]
mod common;

use common::*;

struct FinalState {
    status: OrderStatus,
    transaction_id: Option<String>,
    conversions: i64,
    revenue_cents: i64,
    completed_events: usize,
    automation_calls: usize,
}

async fn deliver(channels: &[PaymentChannel]) -> FinalState {
    let (ctx, tf, s, order) = create_context_with_order();

    for channel in channels {
        ctx.reconciler()
            .reconcile(&notice(order.order_number(), OrderStatus::Paid, Some("T1"), *channel))
            .await
            .unwrap();
    }

    let conn = ctx.state.db.get().unwrap();
    let stored = reload_order(&conn, &order);
    let day = funnel_counter_today(&conn, &tf.funnel.id);
    let completed_events = queries::list_session_events(&conn, &s.uuid)
        .unwrap()
        .into_iter()
        .filter(|e| e.event_name == "payment_completed")
        .count();
    drop(conn);

    FinalState {
        status: stored.status(),
        transaction_id: stored.transaction_id().map(String::from),
        conversions: day.conversions,
        revenue_cents: day.revenue_cents,
        completed_events,
        automation_calls: ctx.automation_calls(),
    }
}

#[tokio::test]
async fn test_callback_then_return_matches_return_then_callback() {
    let a = deliver(&[PaymentChannel::Callback, PaymentChannel::Return]).await;
    let b = deliver(&[PaymentChannel::Return, PaymentChannel::Callback]).await;

    for state in [&a, &b] {
        assert_eq!(state.status, OrderStatus::Paid);
        assert_eq!(state.transaction_id.as_deref(), Some("T1"));
        assert_eq!(state.conversions, 1);
        assert_eq!(state.revenue_cents, 11800);
        assert_eq!(state.completed_events, 1);
        assert_eq!(state.automation_calls, 1);
    }
}

#[tokio::test]
async fn test_completed_event_records_the_winning_channel() {
    let (ctx, _tf, s, order) = create_context_with_order();

    ctx.reconciler()
        .reconcile(&notice(order.order_number(), OrderStatus::Paid, Some("T1"), PaymentChannel::Return))
        .await
        .unwrap();

    let conn = ctx.state.db.get().unwrap();
    let event = queries::list_session_events(&conn, &s.uuid)
        .unwrap()
        .into_iter()
        .find(|e| e.event_name == "payment_completed")
        .expect("payment_completed should be recorded");
    assert_eq!(event.payload["source"], "return_endpoint");
    assert_eq!(event.payload["order_number"], order.order_number());
}

#[tokio::test]
async fn test_unverified_paid_return_is_honored() {
    let (ctx, tf, _s, order) = create_context_with_order();
    let mut unverified = notice(order.order_number(), OrderStatus::Paid, Some("T1"), PaymentChannel::Return);
    unverified.verified = false;

    let outcome = ctx.reconciler().reconcile(&unverified).await.unwrap();
    assert!(matches!(outcome, ReconcileOutcome::Applied { conversion_tracked: true, .. }));

    let conn = ctx.state.db.get().unwrap();
    assert_eq!(reload_order(&conn, &order).status(), OrderStatus::Paid);
    assert_eq!(funnel_counter_today(&conn, &tf.funnel.id).conversions, 1);
}

#[tokio::test]
async fn test_unverified_non_success_return_is_rejected() {
    let (ctx, _tf, _s, order) = create_context_with_order();

    for status in [OrderStatus::Failed, OrderStatus::Processing, OrderStatus::Pending] {
        let mut unverified = notice(order.order_number(), status, Some("T1"), PaymentChannel::Return);
        unverified.verified = false;
        let outcome = ctx.reconciler().reconcile(&unverified).await.unwrap();
        assert!(
            matches!(outcome, ReconcileOutcome::VerificationFailed),
            "unverified {} return should not mutate",
            status
        );
    }

    let conn = ctx.state.db.get().unwrap();
    assert_eq!(reload_order(&conn, &order).status(), OrderStatus::Pending);
}

#[tokio::test]
async fn test_unverified_callback_is_rejected_even_when_paid() {
    let (ctx, _tf, _s, order) = create_context_with_order();
    let mut unverified = notice(order.order_number(), OrderStatus::Paid, Some("T1"), PaymentChannel::Callback);
    unverified.verified = false;

    let outcome = ctx.reconciler().reconcile(&unverified).await.unwrap();
    assert!(matches!(outcome, ReconcileOutcome::VerificationFailed));

    let conn = ctx.state.db.get().unwrap();
    let stored = reload_order(&conn, &order);
    assert_eq!(stored.status(), OrderStatus::Pending);
    assert!(!stored.order().conversion_tracked);
}
