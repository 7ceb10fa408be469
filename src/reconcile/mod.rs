//! Order reconciliation.
//!
//! Server callbacks and browser returns both land here. Each notice is
//! applied inside an IMMEDIATE transaction that re-reads the order, plans the
//! transition and writes it with a compare-and-set on the observed status, so
//! duplicate or racing deliveries converge on one final state. The one-time
//! conversion bundle is claimed through `conversion_tracked` in the same
//! transaction; pixel and automation calls happen after commit and are
//! best-effort.

pub mod redirect;
pub mod transition;

use std::sync::Arc;

use rusqlite::{Connection, TransactionBehavior};
use serde_json::json;

use crate::db::{AppState, DbPool, queries};
use crate::error::{AppError, GatewayError, Result};
use crate::integrations::{AutomationClient, PixelClient};
use crate::models::{
    Funnel, FunnelSession, FunnelStep, OrderRef, OrderStatus, PIXEL_EVENT_ID_KEY, PaymentChannel,
    PaymentRecord,
};
use crate::tracking::{cart, events, ledger, session};

pub use redirect::{ReturnDisposition, order_not_found_redirect, resolve_return_redirect};
use transition::Plan;

/// Strip gateway noise appended after the order number (`ORD-123?transaction_id=..`).
pub fn sanitize_order_number(raw: &str) -> &str {
    raw.split('?').next().unwrap_or_default().trim()
}

/// One payment outcome reported by a gateway channel.
#[derive(Debug, Clone)]
pub struct PaymentNotice {
    pub order_number: String,
    pub transaction_id: Option<String>,
    pub status: OrderStatus,
    pub channel: PaymentChannel,
    /// Whether the gateway checksum/signature matched.
    pub verified: bool,
}

#[derive(Debug, Clone)]
pub enum ReconcileOutcome {
    Applied {
        order: OrderRef,
        from: OrderStatus,
        to: OrderStatus,
        /// True when this notice ran the conversion side effects.
        conversion_tracked: bool,
    },
    AlreadyProcessed {
        order: OrderRef,
    },
    /// Incoming status would move a settled order; ignored.
    InvalidTransition {
        order: OrderRef,
        incoming: OrderStatus,
    },
    VerificationFailed,
    OrderNotFound,
}

impl ReconcileOutcome {
    pub fn order(&self) -> Option<&OrderRef> {
        match self {
            Self::Applied { order, .. }
            | Self::AlreadyProcessed { order }
            | Self::InvalidTransition { order, .. } => Some(order),
            Self::VerificationFailed | Self::OrderNotFound => None,
        }
    }
}

/// Funnel context an order was placed in.
#[derive(Debug, Clone)]
pub(crate) struct FunnelLinkage {
    pub funnel: Funnel,
    pub step: Option<FunnelStep>,
    pub session_uuid: Option<String>,
}

/// Funnel by metadata slug, then metadata id, then the funnel-order row.
pub(crate) fn resolve_linkage(conn: &Connection, order: &dyn PaymentRecord) -> Result<Option<FunnelLinkage>> {
    let meta = order.metadata();
    let funnel_order = queries::get_funnel_order_for_order(conn, order.kind(), order.id())?;

    let mut funnel = None;
    if let Some(slug) = meta.funnel_slug.as_deref() {
        funnel = queries::get_funnel_by_slug(conn, slug)?;
    }
    if funnel.is_none() {
        if let Some(id) = meta.funnel_id.as_deref() {
            funnel = queries::get_funnel_by_id(conn, id)?;
        }
    }
    if funnel.is_none() {
        if let Some(fo) = funnel_order.as_ref() {
            funnel = queries::get_funnel_by_id(conn, &fo.funnel_id)?;
        }
    }
    let Some(funnel) = funnel else {
        return Ok(None);
    };

    let mut step = None;
    if let Some(slug) = meta.step_slug.as_deref() {
        step = queries::get_step_by_slug(conn, &funnel.id, slug)?;
    }
    if step.is_none() {
        if let Some(step_id) = funnel_order.as_ref().and_then(|fo| fo.step_id.as_deref()) {
            step = queries::get_step_by_id(conn, step_id)?.filter(|s| s.funnel_id == funnel.id);
        }
    }

    let session_uuid = meta
        .session_uuid
        .clone()
        .or_else(|| funnel_order.and_then(|fo| fo.session_uuid));

    Ok(Some(FunnelLinkage {
        funnel,
        step,
        session_uuid,
    }))
}

/// Read-only lookup honoring the sanitization and table order used by `reconcile`.
pub fn find_order(conn: &Connection, raw_order_number: &str) -> Result<Option<OrderRef>> {
    let order_number = sanitize_order_number(raw_order_number);
    if order_number.is_empty() {
        return Ok(None);
    }
    queries::find_order_by_number(conn, order_number)
}

/// Work left after the transaction commits.
struct ConversionFollowup {
    funnel: Option<Funnel>,
    session: Option<FunnelSession>,
}

enum Committed {
    Done(ReconcileOutcome),
    Converted(ReconcileOutcome, ConversionFollowup),
}

#[derive(Clone)]
pub struct OrderReconciler {
    db: DbPool,
    base_url: String,
    pixel: Arc<dyn PixelClient>,
    automation: Arc<dyn AutomationClient>,
}

impl OrderReconciler {
    pub fn new(
        db: DbPool,
        base_url: &str,
        pixel: Arc<dyn PixelClient>,
        automation: Arc<dyn AutomationClient>,
    ) -> Self {
        Self {
            db,
            base_url: base_url.trim_end_matches('/').to_string(),
            pixel,
            automation,
        }
    }

    pub fn from_state(state: &AppState) -> Self {
        Self::new(
            state.db.clone(),
            &state.base_url,
            state.pixel.clone(),
            state.automation.clone(),
        )
    }

    /// Apply a gateway notice. Never returns an error for business outcomes;
    /// only storage failures surface as `Err`.
    pub async fn reconcile(&self, notice: &PaymentNotice) -> Result<ReconcileOutcome> {
        if !notice.verified {
            // Unverified returns are honored for success only.
            if notice.channel == PaymentChannel::Return && notice.status == OrderStatus::Paid {
                tracing::warn!(
                    order = %notice.order_number,
                    "Return checksum failed, accepting paid status"
                );
            } else {
                tracing::warn!(
                    order = %notice.order_number,
                    channel = %notice.channel.as_str(),
                    status = %notice.status,
                    "Unverified payment notice ignored"
                );
                return Ok(ReconcileOutcome::VerificationFailed);
            }
        }

        let order_number = sanitize_order_number(&notice.order_number);
        if order_number.is_empty() {
            return Ok(ReconcileOutcome::OrderNotFound);
        }

        let committed = {
            let mut conn = self.db.get()?;
            apply_notice(&mut conn, order_number, notice)?
        };

        match committed {
            Committed::Done(outcome) => Ok(outcome),
            Committed::Converted(outcome, followup) => {
                if let Some(order) = outcome.order() {
                    self.after_commit(order, followup).await;
                }
                Ok(outcome)
            }
        }
    }

    /// Pixel then automation. Failures are logged and swallowed.
    async fn after_commit(&self, order: &OrderRef, followup: ConversionFollowup) {
        let ConversionFollowup { funnel, session } = followup;

        if let Some(funnel) = funnel.as_ref().filter(|f| f.pixel_enabled()) {
            let source_url = format!("{}/f/{}", self.base_url, funnel.slug);
            let existing = order.metadata().get_str(PIXEL_EVENT_ID_KEY);
            match self
                .pixel
                .track_purchase(funnel, order, session.as_ref(), existing, &source_url)
                .await
            {
                Ok(event_id) => {
                    if let Err(e) = self.store_pixel_event_id(order, &event_id) {
                        tracing::warn!(order = %order.order_number(), "Failed to store pixel event id: {}", e);
                    }
                }
                Err(GatewayError::NotConfigured(service)) => {
                    tracing::debug!(order = %order.order_number(), "{} not configured, skipping", service);
                }
                Err(e) => {
                    tracing::warn!(order = %order.order_number(), "Purchase pixel failed: {}", e);
                }
            }
        }

        if let Err(e) = self
            .automation
            .trigger_purchase_completed(order, session.as_ref())
            .await
        {
            tracing::warn!(order = %order.order_number(), "Purchase automation failed: {}", e);
        }
    }

    fn store_pixel_event_id(&self, order: &OrderRef, event_id: &str) -> Result<()> {
        let conn = self.db.get()?;
        queries::merge_order_metadata(&conn, order.kind(), order.id(), PIXEL_EVENT_ID_KEY, event_id)?;
        Ok(())
    }
}

/// Guarded transition plus conversion bundle, all in one IMMEDIATE transaction.
fn apply_notice(conn: &mut Connection, order_number: &str, notice: &PaymentNotice) -> Result<Committed> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let Some(order) = queries::find_order_by_number(&tx, order_number)? else {
        tracing::warn!(order = %order_number, channel = %notice.channel.as_str(), "Order not found");
        return Ok(Committed::Done(ReconcileOutcome::OrderNotFound));
    };

    let from = order.status();
    let incoming_txn = notice.transaction_id.as_deref().filter(|t| !t.is_empty());

    match transition::plan(from, order.transaction_id(), notice.status, incoming_txn) {
        Plan::Apply => {}
        Plan::AlreadyProcessed => {
            tracing::debug!(order = %order_number, status = %from, "Payment notice already processed");
            return Ok(Committed::Done(ReconcileOutcome::AlreadyProcessed { order }));
        }
        Plan::Invalid => {
            tracing::warn!(
                order = %order_number,
                stored = %from,
                incoming = %notice.status,
                "Ignoring invalid order transition"
            );
            return Ok(Committed::Done(ReconcileOutcome::InvalidTransition {
                order,
                incoming: notice.status,
            }));
        }
    }

    let applied = queries::try_transition_order(
        &tx,
        &queries::OrderTransition {
            kind: order.kind(),
            order_id: order.id(),
            from,
            from_transaction_id: order.transaction_id(),
            to: notice.status,
            transaction_id: incoming_txn,
            channel: notice.channel,
        },
    )?;
    if !applied {
        // Row changed since it was read.
        return Ok(Committed::Done(ReconcileOutcome::AlreadyProcessed { order }));
    }

    let followup = if notice.status == OrderStatus::Paid
        && queries::try_claim_conversion(&tx, order.kind(), order.id())?
    {
        Some(record_conversion(&tx, &order, notice.channel)?)
    } else {
        None
    };

    if notice.status == OrderStatus::Failed {
        record_failure(&tx, &order, notice.channel)?;
    }

    let updated = queries::get_order_by_id(&tx, order.kind(), order.id())?
        .map(|o| OrderRef::new(order.kind(), o))
        .ok_or_else(|| AppError::Internal("order vanished during reconciliation".into()))?;
    tx.commit()?;

    tracing::info!(
        order = %updated.order_number(),
        from = %from,
        to = %notice.status,
        channel = %notice.channel.as_str(),
        conversion = followup.is_some(),
        "Order status updated"
    );

    let outcome = ReconcileOutcome::Applied {
        order: updated,
        from,
        to: notice.status,
        conversion_tracked: followup.is_some(),
    };
    Ok(match followup {
        Some(followup) => Committed::Converted(outcome, followup),
        None => Committed::Done(outcome),
    })
}

/// Session, counters, cart and affiliate credit for a newly paid order.
/// Runs once per order, after `conversion_tracked` was claimed.
fn record_conversion(
    conn: &Connection,
    order: &OrderRef,
    channel: PaymentChannel,
) -> Result<ConversionFollowup> {
    let Some(linkage) = resolve_linkage(conn, order)? else {
        tracing::debug!(order = %order.order_number(), "Paid order has no funnel linkage");
        return Ok(ConversionFollowup {
            funnel: None,
            session: None,
        });
    };

    let session = match linkage.session_uuid.as_deref() {
        Some(uuid) => queries::get_session(conn, uuid)?,
        None => None,
    };
    let step_id = linkage.step.as_ref().map(|s| s.id.as_str());

    if let Some(s) = session.as_ref() {
        session::mark_converted(conn, &s.uuid)?;

        let payload = json!({
            "order_number": order.order_number(),
            "order_kind": order.kind().as_str(),
            "transaction_id": order.transaction_id(),
            "total_cents": order.total_cents(),
            "currency": order.currency(),
            "source": channel.event_source(),
        });
        if let Err(e) = session::track_event(conn, s, events::PAYMENT_COMPLETED, payload, step_id) {
            tracing::warn!(session = %s.uuid, "Failed to record payment_completed event: {}", e);
        }
    }

    ledger::increment_conversions(conn, &linkage.funnel.id, step_id, order.total_cents())?;

    if let Some(s) = session.as_ref() {
        if let Some(c) = queries::get_cart_by_session(conn, &s.uuid)? {
            cart::mark_as_recovered(conn, &c.id, order)?;
        }
        if ledger::credit_affiliate(conn, s, order)? {
            tracing::info!(
                order = %order.order_number(),
                affiliate = ?s.affiliate_id,
                "Affiliate credited"
            );
        }
    }

    // Re-read so collaborators see the converted session.
    let session = match session {
        Some(s) => queries::get_session(conn, &s.uuid)?,
        None => None,
    };

    Ok(ConversionFollowup {
        funnel: Some(linkage.funnel),
        session,
    })
}

/// Telemetry for a failed payment. Errors are logged and dropped.
fn record_failure(conn: &Connection, order: &OrderRef, channel: PaymentChannel) -> Result<()> {
    let Some(linkage) = resolve_linkage(conn, order)? else {
        return Ok(());
    };
    let Some(uuid) = linkage.session_uuid.as_deref() else {
        return Ok(());
    };
    if let Some(s) = queries::get_session(conn, uuid)? {
        let payload = json!({
            "order_number": order.order_number(),
            "source": channel.event_source(),
        });
        let step_id = linkage.step.as_ref().map(|st| st.id.as_str());
        if let Err(e) = session::track_event(conn, &s, events::PAYMENT_FAILED, payload, step_id) {
            tracing::warn!(session = %s.uuid, "Failed to record payment_failed event: {}", e);
        }
    }
    Ok(())
}
