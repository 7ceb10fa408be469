mod bayarcash;
mod stripe;

pub use bayarcash::*;
pub use stripe::*;

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::GatewayError;
use crate::models::OrderRef;

/// Flat form/query fields posted by a gateway.
pub type GatewayPayload = BTreeMap<String, String>;

/// Hosted payment page for one order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentIntent {
    pub url: String,
    pub intent_id: String,
}

/// Payment gateway used for funnel checkouts.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn name(&self) -> &'static str;

    /// Server-to-server callback checksum.
    fn verify_callback(&self, payload: &GatewayPayload) -> bool;

    /// Browser return checksum.
    fn verify_return(&self, payload: &GatewayPayload) -> bool;

    async fn create_payment_intent(&self, order: &OrderRef) -> Result<PaymentIntent, GatewayError>;
}
