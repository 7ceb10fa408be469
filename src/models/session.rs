use serde::{Deserialize, Serialize};

/// One visitor's tracked journey through a funnel (not an auth session).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunnelSession {
    pub uuid: String,
    pub funnel_id: String,
    /// Longer-lived than the session; survives across sessions in the same browser.
    pub visitor_id: String,
    /// Frozen at creation.
    pub affiliate_id: Option<String>,
    pub entry_step_id: Option<String>,
    pub current_step_id: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub status: SessionStatus,
    pub utm: UtmParams,
    pub referrer: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub started_at: i64,
    pub last_activity_at: i64,
    pub converted_at: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Converted,
    /// Idle past the session TTL; kept for analytics, never resumed.
    Expired,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Converted => "converted",
            Self::Expired => "expired",
        }
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "converted" => Ok(Self::Converted),
            "expired" => Ok(Self::Expired),
            _ => Err(format!("unknown session status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtmParams {
    #[serde(default)]
    pub utm_source: Option<String>,
    #[serde(default)]
    pub utm_medium: Option<String>,
    #[serde(default)]
    pub utm_campaign: Option<String>,
    #[serde(default)]
    pub utm_content: Option<String>,
    #[serde(default)]
    pub utm_term: Option<String>,
}

/// Request-scoped attributes captured when a session is first created.
#[derive(Debug, Clone, Default)]
pub struct VisitContext {
    pub utm: UtmParams,
    pub referrer: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    /// Referral code from the URL (`?ref=`).
    pub ref_code: Option<String>,
    /// Affiliate previously resolved for this funnel and echoed back via cookie.
    pub affiliate_cookie: Option<String>,
    pub entry_step_id: Option<String>,
}

/// Immutable telemetry record. Never read by business logic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    pub id: String,
    pub session_uuid: String,
    pub funnel_id: String,
    pub step_id: Option<String>,
    pub event_name: String,
    pub payload: serde_json::Value,
    pub created_at: i64,
}
