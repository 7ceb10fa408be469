#[path = "../common/mod.rs"]
mod common;

use common::*;

fn contact() -> CheckoutContact {
    CheckoutContact {
        name: Some("Aisyah".to_string()),
        email: Some("aisyah@example.com".to_string()),
        phone: None,
    }
}

#[test]
fn test_place_order_creates_pending_linked_order() {
    let mut conn = setup_test_db();
    let tf = create_test_funnel(&conn, "launch");
    let (s, order) = create_test_order(&mut conn, &tf, Some("PARTNER"));

    let o = order.order();
    assert_eq!(order.kind(), OrderKind::Product);
    assert_eq!(o.status, OrderStatus::Pending);
    assert_eq!(o.total_cents, 11800);
    assert_eq!(o.currency, "MYR");
    assert_eq!(o.email.as_deref(), Some("aisyah@example.com"));
    assert_eq!(o.metadata.funnel_id.as_deref(), Some(tf.funnel.id.as_str()));
    assert_eq!(o.metadata.funnel_slug.as_deref(), Some("launch"));
    assert_eq!(o.metadata.step_slug.as_deref(), Some("checkout"));
    assert_eq!(o.metadata.session_uuid.as_deref(), Some(s.uuid.as_str()));
    assert_eq!(o.metadata.extra["customer_name"], "Aisyah");

    let number = &o.order_number;
    let expected_prefix = format!("ORD-{}-", ledger::today().format("%Y%m%d"));
    assert!(number.starts_with(&expected_prefix), "{}", number);
    let suffix = &number[expected_prefix.len()..];
    assert_eq!(suffix.len(), 8);
    assert!(suffix.chars().all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));

    let link = queries::get_funnel_order_for_order(&conn, OrderKind::Product, order.id())
        .unwrap()
        .unwrap();
    assert_eq!(link.funnel_id, tf.funnel.id);
    assert_eq!(link.step_id.as_deref(), Some(tf.checkout.id.as_str()));
    assert_eq!(link.session_uuid.as_deref(), Some(s.uuid.as_str()));
    assert_eq!(link.revenue_cents, 11800);
    assert_eq!(link.affiliate_id.as_deref(), Some("aff_partner"));

    let events = queries::list_session_events(&conn, &s.uuid).unwrap();
    let started: Vec<_> = events.iter().filter(|e| e.event_name == "checkout_started").collect();
    assert_eq!(started.len(), 1);
    assert_eq!(started[0].payload["order_number"], number.as_str());

    let stored_session = queries::get_session(&conn, &s.uuid).unwrap().unwrap();
    assert_eq!(stored_session.email.as_deref(), Some("aisyah@example.com"));
    // Pending until paid
    assert_eq!(stored_session.status, SessionStatus::Active);
    let c = queries::get_cart_by_session(&conn, &s.uuid).unwrap().unwrap();
    assert_eq!(c.status, CartStatus::Pending);
}

#[test]
fn test_place_order_requires_a_non_empty_cart() {
    let mut conn = setup_test_db();
    let tf = create_test_funnel(&conn, "launch");
    let s = create_test_session(&conn, &tf, None);

    let no_cart = checkout::place_order(&mut conn, &s, &contact(), "MYR");
    assert!(matches!(no_cart, Err(AppError::BadRequest(_))));

    cart::get_or_create_cart(&conn, &s).unwrap();
    let empty_cart = checkout::place_order(&mut conn, &s, &contact(), "MYR");
    assert!(matches!(empty_cart, Err(AppError::BadRequest(_))));
}

#[test]
fn test_place_order_reprices_from_current_catalog() {
    let mut conn = setup_test_db();
    let tf = create_test_funnel(&conn, "launch");
    let s = create_test_session(&conn, &tf, None);
    let c = cart::get_or_create_cart(&conn, &s).unwrap();
    cart::toggle_product(&mut conn, &c.id, &tf.product.id).unwrap();

    conn.execute(
        "UPDATE funnel_products SET funnel_price_cents = 7900 WHERE id = ?1",
        [&tf.product.id],
    )
    .unwrap();

    let order = checkout::place_order(&mut conn, &s, &contact(), "MYR").unwrap();
    assert_eq!(order.total_cents(), 7900);
}

#[test]
fn test_place_order_without_step_leaves_step_unset() {
    let mut conn = setup_test_db();
    let tf = create_test_funnel(&conn, "launch");
    let s = create_test_session(&conn, &tf, None);
    let c = cart::get_or_create_cart(&conn, &s).unwrap();
    cart::toggle_bump(&mut conn, &c.id, &tf.bump.id).unwrap();

    let order = checkout::place_order(&mut conn, &s, &CheckoutContact::default(), "MYR").unwrap();

    assert_eq!(order.metadata().step_slug, None);
    assert_eq!(order.email(), None);
    let link = queries::get_funnel_order_for_order(&conn, OrderKind::Product, order.id())
        .unwrap()
        .unwrap();
    assert_eq!(link.step_id, None);
}

#[test]
fn test_recovered_cart_cannot_check_out_again() {
    let mut conn = setup_test_db();
    let tf = create_test_funnel(&conn, "launch");
    let (s, order) = create_test_order(&mut conn, &tf, None);
    let c = queries::get_cart_by_session(&conn, &s.uuid).unwrap().unwrap();
    cart::mark_as_recovered(&conn, &c.id, &order).unwrap();

    let result = checkout::place_order(&mut conn, &s, &contact(), "MYR");
    assert!(matches!(result, Err(AppError::Conflict(_))));
}

#[test]
fn test_attach_payment_intent_merges_metadata() {
    let mut conn = setup_test_db();
    let tf = create_test_funnel(&conn, "launch");
    let (_s, order) = create_test_order(&mut conn, &tf, None);

    let intent = PaymentIntent {
        url: "https://pay.test/x".to_string(),
        intent_id: "pi_123".to_string(),
    };
    checkout::attach_payment_intent(&conn, &order, &intent).unwrap();

    let stored = reload_order(&conn, &order);
    assert_eq!(stored.metadata().extra[PAYMENT_INTENT_KEY], "pi_123");
    assert_eq!(stored.metadata().funnel_slug.as_deref(), Some("launch"));
    assert_eq!(stored.metadata().extra["customer_name"], "Aisyah");
}
