use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{AppError, Result, msg};
use crate::models::{OrderStatus, StripeConfig};

type HmacSha256 = Hmac<Sha256>;

/// Verifies Stripe webhook deliveries. Stripe only reports outcomes here;
/// payment intents themselves are created through the primary gateway.
#[derive(Debug, Clone)]
pub struct StripeClient {
    webhook_secret: String,
}

impl StripeClient {
    pub fn new(config: &StripeConfig) -> Self {
        Self {
            webhook_secret: config.webhook_secret.clone(),
        }
    }

    /// Maximum age of a webhook timestamp before it's rejected (in seconds).
    const WEBHOOK_TIMESTAMP_TOLERANCE_SECS: i64 = 300;

    /// Check a `Stripe-Signature` header (`t=<ts>,v1=<hex>`) against the raw body.
    ///
    /// Malformed headers are `BadRequest`; a well-formed but wrong, stale or
    /// future-dated signature is `Ok(false)`.
    pub fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> Result<bool> {
        self.verify_webhook_signature_at(payload, signature, chrono::Utc::now().timestamp())
    }

    fn verify_webhook_signature_at(&self, payload: &[u8], signature: &str, now: i64) -> Result<bool> {
        let mut timestamp = None;
        let mut candidates = Vec::new();

        for part in signature.split(',').map(str::trim) {
            if let Some(t) = part.strip_prefix("t=") {
                timestamp = Some(t);
            } else if let Some(s) = part.strip_prefix("v1=") {
                candidates.push(s);
            }
        }

        let timestamp_str =
            timestamp.ok_or_else(|| AppError::BadRequest(msg::INVALID_SIGNATURE_FORMAT.into()))?;
        if candidates.is_empty() {
            return Err(AppError::BadRequest(msg::INVALID_SIGNATURE_FORMAT.into()));
        }

        let timestamp: i64 = timestamp_str
            .parse()
            .map_err(|_| AppError::BadRequest(msg::INVALID_TIMESTAMP_IN_SIGNATURE.into()))?;

        let age = now - timestamp;
        if age > Self::WEBHOOK_TIMESTAMP_TOLERANCE_SECS {
            tracing::warn!(
                "Stripe webhook rejected: timestamp too old (age={}s, max={}s)",
                age,
                Self::WEBHOOK_TIMESTAMP_TOLERANCE_SECS
            );
            return Ok(false);
        }
        // 60s clock skew allowance
        if age < -60 {
            tracing::warn!("Stripe webhook rejected: timestamp in the future (age={}s)", age);
            return Ok(false);
        }

        let mut mac = HmacSha256::new_from_slice(self.webhook_secret.as_bytes())
            .map_err(|_| AppError::Internal(msg::INVALID_WEBHOOK_SECRET.into()))?;
        mac.update(timestamp_str.as_bytes());
        mac.update(b".");
        mac.update(payload);
        let expected = hex::encode(mac.finalize().into_bytes());

        // Stripe may send several v1 signatures while a secret is being rolled.
        Ok(candidates.iter().any(|provided| {
            provided.len() == expected.len() && bool::from(expected.as_bytes().ct_eq(provided.as_bytes()))
        }))
    }
}

/// Generic Stripe webhook event; `data.object` is parsed per event type.
#[derive(Debug, Deserialize)]
pub struct StripeWebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: StripeEventData,
}

#[derive(Debug, Deserialize)]
pub struct StripeEventData {
    pub object: serde_json::Value,
}

#[derive(Debug, Default, Deserialize)]
pub struct StripeMetadata {
    pub order_number: Option<String>,
}

// ============ payment_intent.* ============

#[derive(Debug, Deserialize)]
pub struct StripePaymentIntent {
    pub id: String,
    pub status: Option<String>,
    #[serde(default)]
    pub metadata: StripeMetadata,
}

// ============ checkout.session.completed ============

#[derive(Debug, Deserialize)]
pub struct StripeCheckoutSession {
    pub id: String,
    /// "paid", "unpaid" or "no_payment_required"
    pub payment_status: String,
    pub payment_intent: Option<String>,
    #[serde(default)]
    pub metadata: StripeMetadata,
}

/// Outcome a Stripe event reports for one of our orders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StripePaymentUpdate {
    pub order_number: String,
    pub transaction_id: String,
    pub status: OrderStatus,
}

/// What to do with a verified event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StripeDispatch {
    Apply(StripePaymentUpdate),
    /// Event type we do not act on, or an object that does not reference an order.
    Ignore,
}

/// Map a verified event to an order update.
pub fn dispatch_event(event: &StripeWebhookEvent) -> Result<StripeDispatch> {
    let status = match event.event_type.as_str() {
        "payment_intent.succeeded" => OrderStatus::Paid,
        "payment_intent.payment_failed" => OrderStatus::Failed,
        "payment_intent.processing" => OrderStatus::Processing,
        "checkout.session.completed" => {
            let session: StripeCheckoutSession = serde_json::from_value(event.data.object.clone())?;
            if session.payment_status != "paid" {
                tracing::debug!(
                    session = %session.id,
                    payment_status = %session.payment_status,
                    "Checkout session completed without payment"
                );
                return Ok(StripeDispatch::Ignore);
            }
            let Some(order_number) = session.metadata.order_number else {
                tracing::debug!(session = %session.id, "Checkout session has no order_number");
                return Ok(StripeDispatch::Ignore);
            };
            return Ok(StripeDispatch::Apply(StripePaymentUpdate {
                order_number,
                transaction_id: session.payment_intent.unwrap_or(session.id),
                status: OrderStatus::Paid,
            }));
        }
        _ => return Ok(StripeDispatch::Ignore),
    };

    let intent: StripePaymentIntent = serde_json::from_value(event.data.object.clone())?;
    match intent.metadata.order_number {
        Some(order_number) => Ok(StripeDispatch::Apply(StripePaymentUpdate {
            order_number,
            transaction_id: intent.id,
            status,
        })),
        None => {
            tracing::debug!(intent = %intent.id, "Payment intent has no order_number");
            Ok(StripeDispatch::Ignore)
        }
    }
}
