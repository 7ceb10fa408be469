use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use crate::error::GatewayError;
use crate::models::{FunnelSession, OrderRef, PaymentRecord};

const SERVICE: &str = "automation";

/// Quick retries (100ms, 200ms) so a webhook response is not held up.
const AUTOMATION_RETRY_DELAYS: &[u64] = &[100, 200];

/// Lifecycle automations (receipts, onboarding sequences, CRM tags).
#[async_trait]
pub trait AutomationClient: Send + Sync {
    async fn trigger_purchase_completed(
        &self,
        order: &OrderRef,
        session: Option<&FunnelSession>,
    ) -> Result<(), GatewayError>;
}

/// Body posted to the automation webhook.
#[derive(Debug, Clone, Serialize)]
pub struct PurchaseCompletedEvent {
    /// Always "purchase_completed"
    pub event: &'static str,
    pub order_kind: &'static str,
    pub order_id: String,
    pub order_number: String,
    pub total_cents: i64,
    pub currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub funnel_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_uuid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub affiliate_id: Option<String>,
    pub timestamp: i64,
    /// Receivers deduplicate retries on this.
    pub idempotency_key: String,
}

impl PurchaseCompletedEvent {
    pub fn new(order: &OrderRef, session: Option<&FunnelSession>) -> Self {
        Self {
            event: "purchase_completed",
            order_kind: order.kind().as_str(),
            order_id: order.id().to_string(),
            order_number: order.order_number().to_string(),
            total_cents: order.total_cents(),
            currency: order.currency().to_string(),
            email: order
                .email()
                .map(String::from)
                .or_else(|| session.and_then(|s| s.email.clone())),
            phone: session.and_then(|s| s.phone.clone()),
            funnel_id: session
                .map(|s| s.funnel_id.clone())
                .or_else(|| order.metadata().funnel_id.clone()),
            session_uuid: session.map(|s| s.uuid.clone()),
            affiliate_id: session.and_then(|s| s.affiliate_id.clone()),
            timestamp: chrono::Utc::now().timestamp(),
            idempotency_key: format!("purchase_completed:{}:{}", order.kind().as_str(), order.id()),
        }
    }
}

/// Posts `PurchaseCompletedEvent` JSON to a configured URL.
#[derive(Debug, Clone)]
pub struct WebhookAutomationClient {
    client: Client,
    url: String,
    timeout: Duration,
}

impl WebhookAutomationClient {
    pub fn new(client: Client, url: &str, timeout: Duration) -> Self {
        Self {
            client,
            url: url.to_string(),
            timeout,
        }
    }
}

#[async_trait]
impl AutomationClient for WebhookAutomationClient {
    async fn trigger_purchase_completed(
        &self,
        order: &OrderRef,
        session: Option<&FunnelSession>,
    ) -> Result<(), GatewayError> {
        let event = PurchaseCompletedEvent::new(order, session);
        let mut last_error = None;

        for (attempt, delay_ms) in std::iter::once(&0u64)
            .chain(AUTOMATION_RETRY_DELAYS.iter())
            .enumerate()
        {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(*delay_ms)).await;
            }

            match self
                .client
                .post(&self.url)
                .json(&event)
                .timeout(self.timeout)
                .send()
                .await
            {
                Ok(resp) if resp.status().is_success() => {
                    if attempt > 0 {
                        tracing::debug!("Automation webhook succeeded after {} retries", attempt);
                    }
                    return Ok(());
                }
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    tracing::debug!("Automation webhook returned {}", status);
                    last_error = Some(GatewayError::Status {
                        service: SERVICE,
                        status,
                        body: resp.text().await.unwrap_or_default(),
                    });
                }
                Err(e) => {
                    tracing::debug!("Automation webhook failed: {}", e);
                    last_error = Some(GatewayError::Request {
                        service: SERVICE,
                        message: e.to_string(),
                    });
                }
            }
        }

        Err(last_error.unwrap_or(GatewayError::Request {
            service: SERVICE,
            message: format!("failed after {} attempts", AUTOMATION_RETRY_DELAYS.len() + 1),
        }))
    }
}

/// Used when no automation webhook is configured.
#[derive(Debug, Clone, Default)]
pub struct NoopAutomationClient;

#[async_trait]
impl AutomationClient for NoopAutomationClient {
    async fn trigger_purchase_completed(
        &self,
        order: &OrderRef,
        _session: Option<&FunnelSession>,
    ) -> Result<(), GatewayError> {
        tracing::debug!(order = %order.order_number(), "No automation webhook configured");
        Ok(())
    }
}
