//! Test utilities and fixtures for funnelpay integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

pub use funnelpay::checkout::{self, CheckoutContact};
pub use funnelpay::db::{AppState, DbPool, init_db, queries};
pub use funnelpay::error::{AppError, GatewayError};
pub use funnelpay::handlers;
pub use funnelpay::models::*;
pub use funnelpay::payments::{
    GatewayPayload, PaymentGateway, PaymentIntent, StripeClient, callback_checksum, return_checksum,
};
pub use funnelpay::reconcile::{OrderReconciler, PaymentNotice, ReconcileOutcome};
pub use funnelpay::tracking::{cart, ledger, session};

pub const BASE_URL: &str = "http://localhost:3000";
pub const BAYARCASH_SECRET: &str = "bc_test_secret";
pub const STRIPE_WEBHOOK_SECRET: &str = "whsec_test_secret";
pub const SESSION_TTL_MINUTES: i64 = 1440;

/// In-memory database with schema initialized
pub fn setup_test_db() -> Connection {
    let conn = Connection::open_in_memory().expect("Failed to create in-memory database");
    init_db(&conn).expect("Failed to initialize schema");
    conn
}

/// Single-connection in-memory pool. Every `get()` sees the same database,
/// so tests must drop their connection before calling into handlers.
pub fn test_pool() -> DbPool {
    let manager = SqliteConnectionManager::memory();
    let pool = Pool::builder().max_size(1).build(manager).unwrap();
    {
        let conn = pool.get().unwrap();
        init_db(&conn).unwrap();
    }
    pool
}

// ============ Catalog fixtures ============

pub struct TestFunnel {
    pub funnel: Funnel,
    pub landing: FunnelStep,
    pub checkout: FunnelStep,
    pub thankyou: FunnelStep,
    pub product: FunnelProduct,
    pub second_product: FunnelProduct,
    pub bump: FunnelBump,
    pub affiliate: FunnelAffiliate,
}

fn create_step(conn: &Connection, funnel_id: &str, slug: &str, step_type: StepType, sort_order: i64) -> FunnelStep {
    queries::create_funnel_step(
        conn,
        funnel_id,
        &CreateFunnelStep {
            slug: slug.to_string(),
            step_type,
            sort_order,
        },
    )
    .expect("Failed to create test step")
}

/// Funnel with landing, checkout and thank-you steps, two products priced
/// 9900 and 4900, one 1900 bump, an active `PARTNER` referral code and a pixel.
pub fn create_test_funnel(conn: &Connection, slug: &str) -> TestFunnel {
    let funnel = queries::create_funnel(
        conn,
        &CreateFunnel {
            slug: slug.to_string(),
            name: format!("Test Funnel {}", slug),
            pixel_id: Some("px_test".to_string()),
            pixel_access_token: Some("px_token".to_string()),
        },
    )
    .expect("Failed to create test funnel");

    let landing = create_step(conn, &funnel.id, "landing", StepType::Landing, 0);
    let checkout = create_step(conn, &funnel.id, "checkout", StepType::Checkout, 1);
    let thankyou = create_step(conn, &funnel.id, "thank-you", StepType::Thankyou, 2);

    let product = queries::create_funnel_product(conn, &funnel.id, Some(&checkout.id), "Course", 9900)
        .expect("Failed to create test product");
    let second_product =
        queries::create_funnel_product(conn, &funnel.id, Some(&checkout.id), "Ebook", 4900)
            .expect("Failed to create test product");
    let bump = queries::create_funnel_bump(conn, &funnel.id, Some(&checkout.id), "Workbook", 1900)
        .expect("Failed to create test bump");
    let affiliate = queries::create_funnel_affiliate(conn, &funnel.id, "aff_partner", "PARTNER")
        .expect("Failed to create test affiliate");

    TestFunnel {
        funnel,
        landing,
        checkout,
        thankyou,
        product,
        second_product,
        bump,
        affiliate,
    }
}

pub fn visit_context() -> VisitContext {
    VisitContext {
        utm: UtmParams {
            utm_source: Some("facebook".to_string()),
            ..Default::default()
        },
        ip_address: Some("203.0.113.7".to_string()),
        user_agent: Some("test-agent".to_string()),
        ..Default::default()
    }
}

/// Fresh session for a new visitor, optionally arriving through `ref_code`.
pub fn create_test_session(conn: &Connection, tf: &TestFunnel, ref_code: Option<&str>) -> FunnelSession {
    let ctx = VisitContext {
        ref_code: ref_code.map(String::from),
        ..visit_context()
    };
    session::get_or_create_session(conn, &tf.funnel, None, None, &ctx, SESSION_TTL_MINUTES)
        .expect("Failed to create test session")
        .session
}

/// Session that reached the checkout step with the main product and bump in
/// the cart, then placed a pending order (total 11800).
pub fn create_test_order(conn: &mut Connection, tf: &TestFunnel, ref_code: Option<&str>) -> (FunnelSession, OrderRef) {
    let s = create_test_session(conn, tf, ref_code);
    session::track_pageview(conn, &s, &tf.checkout).expect("Failed to track checkout pageview");

    let c = cart::get_or_create_cart(conn, &s).expect("Failed to create cart");
    cart::toggle_product(conn, &c.id, &tf.product.id).expect("Failed to add product");
    cart::toggle_bump(conn, &c.id, &tf.bump.id).expect("Failed to add bump");

    let s = queries::get_session(conn, &s.uuid).unwrap().unwrap();
    let order = checkout::place_order(
        conn,
        &s,
        &CheckoutContact {
            name: Some("Aisyah".to_string()),
            email: Some("aisyah@example.com".to_string()),
            phone: Some("+60 12-345 6789".to_string()),
        },
        "MYR",
    )
    .expect("Failed to place test order");
    (s, order)
}

pub fn reload_order(conn: &Connection, order: &OrderRef) -> OrderRef {
    queries::find_order_by_number(conn, order.order_number())
        .unwrap()
        .expect("order should exist")
}

pub fn set_affiliate_status(conn: &Connection, id: &str, status: &str) {
    conn.execute(
        "UPDATE funnel_affiliates SET status = ?1 WHERE id = ?2",
        rusqlite::params![status, id],
    )
    .unwrap();
}

/// Ids of pending carts untouched since `before`, oldest first.
pub fn abandoned_cart_ids(conn: &Connection, funnel_id: &str, before: i64) -> Vec<String> {
    let mut stmt = conn
        .prepare(
            "SELECT id FROM carts WHERE funnel_id = ?1 AND status = 'pending' AND updated_at < ?2
             ORDER BY updated_at",
        )
        .unwrap();
    stmt.query_map(rusqlite::params![funnel_id, before], |row| row.get(0))
        .unwrap()
        .collect::<rusqlite::Result<Vec<String>>>()
        .unwrap()
}

pub fn funnel_counter_today(conn: &Connection, funnel_id: &str) -> DailyCounter {
    ledger::get_or_create_for_today(conn, funnel_id, None).unwrap()
}

pub fn step_counter_today(conn: &Connection, funnel_id: &str, step_id: &str) -> DailyCounter {
    ledger::get_or_create_for_today(conn, funnel_id, Some(step_id)).unwrap()
}

pub fn notice(order_number: &str, status: OrderStatus, txn: Option<&str>, channel: PaymentChannel) -> PaymentNotice {
    PaymentNotice {
        order_number: order_number.to_string(),
        transaction_id: txn.map(String::from),
        status,
        channel,
        verified: true,
    }
}

// ============ Gateway payloads ============

pub fn signed_callback(order_number: &str, status: &str, transaction_id: &str) -> GatewayPayload {
    let mut payload: GatewayPayload = [
        ("order_number", order_number),
        ("status", status),
        ("transaction_id", transaction_id),
        ("amount", "118.00"),
        ("currency", "MYR"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    let checksum = callback_checksum(BAYARCASH_SECRET, &payload).unwrap();
    payload.insert("checksum".to_string(), checksum);
    payload
}

pub fn signed_return(order_number: &str, status: &str, transaction_id: &str) -> GatewayPayload {
    let mut payload: GatewayPayload = [
        ("order_number", order_number),
        ("status", status),
        ("transaction_id", transaction_id),
        ("amount", "118.00"),
        ("currency", "MYR"),
        ("status_description", "Approved"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    let checksum = return_checksum(BAYARCASH_SECRET, &payload).unwrap();
    payload.insert("checksum".to_string(), checksum);
    payload
}

/// `application/x-www-form-urlencoded` / query-string encoding.
pub fn encode_payload(payload: &GatewayPayload) -> String {
    payload
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

pub fn stripe_signature(payload: &[u8], timestamp: i64) -> String {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    let mut mac = Hmac::<Sha256>::new_from_slice(STRIPE_WEBHOOK_SECRET.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(format!("{}.", timestamp).as_bytes());
    mac.update(payload);
    format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
}

// ============ Collaborator fakes ============

/// Checks Bayarcash checksums against `BAYARCASH_SECRET` and hands out
/// deterministic payment pages.
pub struct FakeGateway {
    pub intents: AtomicUsize,
    pub fail_intents: bool,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self {
            intents: AtomicUsize::new(0),
            fail_intents: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            intents: AtomicUsize::new(0),
            fail_intents: true,
        }
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn verify_callback(&self, payload: &GatewayPayload) -> bool {
        callback_checksum(BAYARCASH_SECRET, payload).as_deref() == payload.get("checksum").map(String::as_str)
    }

    fn verify_return(&self, payload: &GatewayPayload) -> bool {
        return_checksum(BAYARCASH_SECRET, payload).as_deref() == payload.get("checksum").map(String::as_str)
    }

    async fn create_payment_intent(&self, order: &OrderRef) -> Result<PaymentIntent, GatewayError> {
        if self.fail_intents {
            return Err(GatewayError::Status {
                service: "fake",
                status: 503,
                body: "maintenance".to_string(),
            });
        }
        self.intents.fetch_add(1, Ordering::SeqCst);
        Ok(PaymentIntent {
            url: format!("https://pay.test/{}", order.order_number()),
            intent_id: format!("pi_{}", order.order_number()),
        })
    }
}

#[derive(Default)]
pub struct RecordingPixel {
    pub calls: AtomicUsize,
    /// Event ids passed in by the reconciler, `None` when it had none cached.
    pub seen_event_ids: Mutex<Vec<Option<String>>>,
}

#[async_trait]
impl funnelpay::integrations::PixelClient for RecordingPixel {
    async fn track_purchase(
        &self,
        _funnel: &Funnel,
        order: &OrderRef,
        _session: Option<&FunnelSession>,
        event_id: Option<&str>,
        _source_url: &str,
    ) -> Result<String, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen_event_ids.lock().unwrap().push(event_id.map(String::from));
        Ok(event_id
            .map(String::from)
            .unwrap_or_else(|| funnelpay::integrations::purchase_event_id(order)))
    }
}

#[derive(Default)]
pub struct RecordingAutomation {
    pub calls: AtomicUsize,
    pub orders: Mutex<Vec<String>>,
    pub fail: bool,
}

#[async_trait]
impl funnelpay::integrations::AutomationClient for RecordingAutomation {
    async fn trigger_purchase_completed(
        &self,
        order: &OrderRef,
        _session: Option<&FunnelSession>,
    ) -> Result<(), GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.orders.lock().unwrap().push(order.order_number().to_string());
        if self.fail {
            return Err(GatewayError::Request {
                service: "automation",
                message: "connection refused".to_string(),
            });
        }
        Ok(())
    }
}

// ============ App state ============

pub struct TestContext {
    pub state: AppState,
    pub gateway: Arc<FakeGateway>,
    pub pixel: Arc<RecordingPixel>,
    pub automation: Arc<RecordingAutomation>,
}

impl TestContext {
    pub fn reconciler(&self) -> OrderReconciler {
        OrderReconciler::from_state(&self.state)
    }

    pub fn app(&self) -> Router {
        handlers::router().with_state(self.state.clone())
    }

    pub fn pixel_calls(&self) -> usize {
        self.pixel.calls.load(Ordering::SeqCst)
    }

    pub fn automation_calls(&self) -> usize {
        self.automation.calls.load(Ordering::SeqCst)
    }
}

pub fn build_context(pool: DbPool, gateway: FakeGateway, automation: RecordingAutomation) -> TestContext {
    let gateway = Arc::new(gateway);
    let pixel = Arc::new(RecordingPixel::default());
    let automation = Arc::new(automation);
    let state = AppState {
        db: pool,
        base_url: BASE_URL.to_string(),
        session_ttl_minutes: SESSION_TTL_MINUTES,
        default_currency: "MYR".to_string(),
        gateway: gateway.clone(),
        stripe: Some(Arc::new(StripeClient::new(&StripeConfig {
            webhook_secret: STRIPE_WEBHOOK_SECRET.to_string(),
        }))),
        pixel: pixel.clone(),
        automation: automation.clone(),
    };
    TestContext {
        state,
        gateway,
        pixel,
        automation,
    }
}

/// In-memory state with recording collaborators.
pub fn create_test_context() -> TestContext {
    build_context(test_pool(), FakeGateway::new(), RecordingAutomation::default())
}

/// Context plus a funnel and one pending order placed through it.
pub fn create_context_with_order() -> (TestContext, TestFunnel, FunnelSession, OrderRef) {
    let ctx = create_test_context();
    let (tf, s, order) = {
        let mut conn = ctx.state.db.get().unwrap();
        let tf = create_test_funnel(&conn, "launch");
        let (s, order) = create_test_order(&mut conn, &tf, Some("PARTNER"));
        (tf, s, order)
    };
    (ctx, tf, s, order)
}
