use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use super::{GatewayPayload, PaymentGateway, PaymentIntent};
use crate::error::GatewayError;
use crate::models::{BayarcashConfig, OrderRef, OrderStatus, PaymentRecord};

type HmacSha256 = Hmac<Sha256>;

const SERVICE: &str = "bayarcash";

/// Fields covered by the browser-return checksum.
const RETURN_CHECKSUM_FIELDS: &[&str] = &[
    "transaction_id",
    "exchange_reference_number",
    "exchange_transaction_id",
    "order_number",
    "currency",
    "amount",
    "payer_bank_name",
    "status",
    "status_description",
];

/// FPX online banking.
const PAYMENT_CHANNEL_FPX: &str = "1";

/// Map a Bayarcash numeric status to an order status. Unknown codes are None.
pub fn map_status(code: &str) -> Option<OrderStatus> {
    match code.trim() {
        "1" => Some(OrderStatus::Processing),
        "2" => Some(OrderStatus::Failed),
        "3" => Some(OrderStatus::Paid),
        _ => None,
    }
}

/// `12345` cents -> `"123.45"`.
pub fn format_amount(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let cents = cents.unsigned_abs();
    format!("{}{}.{:02}", sign, cents / 100, cents % 100)
}

/// HMAC-SHA256 hex over the `|`-joined values of `fields`, ordered by key.
fn sign(secret: &str, fields: &BTreeMap<&str, &str>) -> Option<String> {
    let joined = fields.values().copied().collect::<Vec<_>>().join("|");
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(joined.as_bytes());
    Some(hex::encode(mac.finalize().into_bytes()))
}

fn checksum_matches(expected: &str, provided: &str) -> bool {
    let provided = provided.trim().to_ascii_lowercase();
    if expected.len() != provided.len() {
        return false;
    }
    expected.as_bytes().ct_eq(provided.as_bytes()).into()
}

/// Checksum of a server callback: every field except `checksum`.
pub fn callback_checksum(secret: &str, payload: &GatewayPayload) -> Option<String> {
    let fields: BTreeMap<&str, &str> = payload
        .iter()
        .filter(|(k, _)| k.as_str() != "checksum")
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    sign(secret, &fields)
}

/// Checksum of a browser return: the fixed return field set, missing fields as empty.
pub fn return_checksum(secret: &str, payload: &GatewayPayload) -> Option<String> {
    let fields: BTreeMap<&str, &str> = RETURN_CHECKSUM_FIELDS
        .iter()
        .map(|k| (*k, payload.get(*k).map(String::as_str).unwrap_or("")))
        .collect();
    sign(secret, &fields)
}

#[derive(Debug, Serialize)]
struct CreatePaymentIntentRequest<'a> {
    payment_channel: &'a str,
    portal_key: &'a str,
    order_number: &'a str,
    amount: String,
    payer_name: &'a str,
    payer_email: &'a str,
    return_url: String,
    callback_url: String,
    checksum: String,
}

#[derive(Debug, Deserialize)]
struct CreatePaymentIntentResponse {
    id: String,
    url: String,
}

#[derive(Debug, Clone)]
pub struct BayarcashClient {
    client: Client,
    config: BayarcashConfig,
    base_url: String,
    timeout: Duration,
}

impl BayarcashClient {
    pub fn new(client: Client, config: &BayarcashConfig, base_url: &str, timeout: Duration) -> Self {
        Self {
            client,
            config: config.clone(),
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        }
    }

    fn return_url(&self) -> String {
        format!("{}/payments/bayarcash/return", self.base_url)
    }

    fn callback_url(&self) -> String {
        format!("{}/webhooks/bayarcash", self.base_url)
    }
}

#[async_trait]
impl PaymentGateway for BayarcashClient {
    fn name(&self) -> &'static str {
        SERVICE
    }

    fn verify_callback(&self, payload: &GatewayPayload) -> bool {
        let Some(provided) = payload.get("checksum") else {
            return false;
        };
        match callback_checksum(&self.config.secret_key, payload) {
            Some(expected) => checksum_matches(&expected, provided),
            None => false,
        }
    }

    fn verify_return(&self, payload: &GatewayPayload) -> bool {
        let Some(provided) = payload.get("checksum") else {
            return false;
        };
        match return_checksum(&self.config.secret_key, payload) {
            Some(expected) => checksum_matches(&expected, provided),
            None => false,
        }
    }

    async fn create_payment_intent(&self, order: &OrderRef) -> Result<PaymentIntent, GatewayError> {
        if self.config.api_token.is_empty() || self.config.portal_key.is_empty() {
            return Err(GatewayError::NotConfigured(SERVICE));
        }

        let amount = format_amount(order.total_cents());
        let payer_email = order.email().unwrap_or_default();
        let payer_name = order.metadata().get_str("customer_name").unwrap_or(payer_email);

        let signed: BTreeMap<&str, &str> = [
            ("amount", amount.as_str()),
            ("order_number", order.order_number()),
            ("payer_email", payer_email),
            ("payer_name", payer_name),
            ("payment_channel", PAYMENT_CHANNEL_FPX),
        ]
        .into_iter()
        .collect();
        let checksum = sign(&self.config.secret_key, &signed).ok_or(GatewayError::NotConfigured(SERVICE))?;

        let request = CreatePaymentIntentRequest {
            payment_channel: PAYMENT_CHANNEL_FPX,
            portal_key: &self.config.portal_key,
            order_number: order.order_number(),
            amount: amount.clone(),
            payer_name,
            payer_email,
            return_url: self.return_url(),
            callback_url: self.callback_url(),
            checksum,
        };

        let response = self
            .client
            .post(format!("{}/payment-intents", self.config.api_url.trim_end_matches('/')))
            .bearer_auth(&self.config.api_token)
            .json(&request)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| GatewayError::Request {
                service: SERVICE,
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Status {
                service: SERVICE,
                status: status.as_u16(),
                body,
            });
        }

        let intent: CreatePaymentIntentResponse =
            response.json().await.map_err(|e| GatewayError::Decode {
                service: SERVICE,
                message: e.to_string(),
            })?;

        tracing::info!(
            order = %order.order_number(),
            intent = %intent.id,
            "Created Bayarcash payment intent"
        );

        Ok(PaymentIntent {
            url: intent.url,
            intent_id: intent.id,
        })
    }
}
