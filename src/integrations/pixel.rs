use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::GatewayError;
use crate::models::{Funnel, FunnelSession, OrderRef, PaymentRecord};

const SERVICE: &str = "pixel";

/// Server-side ad pixel for purchase events.
#[async_trait]
pub trait PixelClient: Send + Sync {
    /// Report a purchase. Returns the event id the platform deduplicates on.
    async fn track_purchase(
        &self,
        funnel: &Funnel,
        order: &OrderRef,
        session: Option<&FunnelSession>,
        event_id: Option<&str>,
        source_url: &str,
    ) -> Result<String, GatewayError>;
}

/// Stable purchase event id so browser and server events deduplicate.
pub fn purchase_event_id(order: &dyn PaymentRecord) -> String {
    format!("purchase_{}", order.id())
}

/// Lowercased, trimmed, SHA-256 hex, as conversions APIs expect for user data.
fn hash_identifier(value: &str) -> Option<String> {
    let normalized = value.trim().to_lowercase();
    if normalized.is_empty() {
        return None;
    }
    Some(hex::encode(Sha256::digest(normalized.as_bytes())))
}

fn hash_phone(value: &str) -> Option<String> {
    let digits: String = value.chars().filter(char::is_ascii_digit).collect();
    hash_identifier(&digits)
}

#[derive(Debug, Serialize)]
struct EventBatch<'a> {
    data: [PurchaseEvent<'a>; 1],
}

#[derive(Debug, Serialize)]
struct PurchaseEvent<'a> {
    event_name: &'static str,
    event_time: i64,
    event_id: &'a str,
    action_source: &'static str,
    event_source_url: &'a str,
    user_data: UserData,
    custom_data: CustomData<'a>,
}

#[derive(Debug, Serialize)]
struct UserData {
    #[serde(skip_serializing_if = "Option::is_none")]
    em: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ph: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    external_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct CustomData<'a> {
    currency: &'a str,
    /// Major units, e.g. 99.0
    value: f64,
    order_id: &'a str,
}

/// Conversions-API style client: `POST {api_url}/{pixel_id}/events`.
#[derive(Debug, Clone)]
pub struct HttpPixelClient {
    client: Client,
    api_url: String,
    timeout: Duration,
}

impl HttpPixelClient {
    pub fn new(client: Client, api_url: &str, timeout: Duration) -> Self {
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            timeout,
        }
    }
}

#[async_trait]
impl PixelClient for HttpPixelClient {
    async fn track_purchase(
        &self,
        funnel: &Funnel,
        order: &OrderRef,
        session: Option<&FunnelSession>,
        event_id: Option<&str>,
        source_url: &str,
    ) -> Result<String, GatewayError> {
        let pixel_id = funnel
            .pixel_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or(GatewayError::NotConfigured(SERVICE))?;

        let event_id = event_id
            .map(String::from)
            .unwrap_or_else(|| purchase_event_id(order));

        let email = order
            .email()
            .or_else(|| session.and_then(|s| s.email.as_deref()));
        let user_data = UserData {
            em: email.and_then(hash_identifier),
            ph: session.and_then(|s| s.phone.as_deref()).and_then(hash_phone),
            client_ip_address: session.and_then(|s| s.ip_address.clone()),
            client_user_agent: session.and_then(|s| s.user_agent.clone()),
            external_id: session.and_then(|s| hash_identifier(&s.visitor_id)),
        };

        let batch = EventBatch {
            data: [PurchaseEvent {
                event_name: "Purchase",
                event_time: chrono::Utc::now().timestamp(),
                event_id: &event_id,
                action_source: "website",
                event_source_url: source_url,
                user_data,
                custom_data: CustomData {
                    currency: order.currency(),
                    value: order.total_cents() as f64 / 100.0,
                    order_id: order.order_number(),
                },
            }],
        };

        let mut request = self
            .client
            .post(format!("{}/{}/events", self.api_url, pixel_id))
            .json(&batch)
            .timeout(self.timeout);
        if let Some(token) = funnel.pixel_access_token.as_deref() {
            request = request.query(&[("access_token", token)]);
        }

        let response = request.send().await.map_err(|e| GatewayError::Request {
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

        tracing::info!(funnel = %funnel.slug, order = %order.order_number(), event_id = %event_id, "Purchase pixel sent");
        Ok(event_id)
    }
}

/// Used when no pixel endpoint is configured.
#[derive(Debug, Clone, Default)]
pub struct NoopPixelClient;

#[async_trait]
impl PixelClient for NoopPixelClient {
    async fn track_purchase(
        &self,
        _funnel: &Funnel,
        _order: &OrderRef,
        _session: Option<&FunnelSession>,
        _event_id: Option<&str>,
        _source_url: &str,
    ) -> Result<String, GatewayError> {
        Err(GatewayError::NotConfigured(SERVICE))
    }
}
