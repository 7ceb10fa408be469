use serde::{Deserialize, Serialize};

/// A configured multi-step marketing/checkout flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Funnel {
    pub id: String,
    pub slug: String,
    pub name: String,
    pub status: String,
    /// Ad platform pixel. Server-side purchase events are only fired when set.
    pub pixel_id: Option<String>,
    #[serde(skip_serializing)]
    pub pixel_access_token: Option<String>,
    pub created_at: i64,
}

impl Funnel {
    pub fn pixel_enabled(&self) -> bool {
        self.pixel_id.as_deref().is_some_and(|id| !id.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Landing,
    Optin,
    Sales,
    Checkout,
    Upsell,
    Downsell,
    Thankyou,
}

impl StepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Landing => "landing",
            Self::Optin => "optin",
            Self::Sales => "sales",
            Self::Checkout => "checkout",
            Self::Upsell => "upsell",
            Self::Downsell => "downsell",
            Self::Thankyou => "thankyou",
        }
    }
}

impl std::str::FromStr for StepType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "landing" => Ok(Self::Landing),
            "optin" => Ok(Self::Optin),
            "sales" => Ok(Self::Sales),
            "checkout" => Ok(Self::Checkout),
            "upsell" => Ok(Self::Upsell),
            "downsell" => Ok(Self::Downsell),
            "thankyou" | "thank_you" => Ok(Self::Thankyou),
            _ => Err(format!("unknown step type: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunnelStep {
    pub id: String,
    pub funnel_id: String,
    pub slug: String,
    pub step_type: StepType,
    pub sort_order: i64,
}

/// A product offered inside a funnel at its funnel-specific price.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunnelProduct {
    pub id: String,
    pub funnel_id: String,
    pub step_id: Option<String>,
    pub name: String,
    pub funnel_price_cents: i64,
}

/// An optional add-on offered at checkout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunnelBump {
    pub id: String,
    pub funnel_id: String,
    pub step_id: Option<String>,
    pub name: String,
    pub price_cents: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunnelAffiliate {
    pub id: String,
    pub funnel_id: String,
    pub affiliate_id: String,
    pub ref_code: String,
    pub status: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateFunnel {
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub pixel_id: Option<String>,
    #[serde(default)]
    pub pixel_access_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateFunnelStep {
    pub slug: String,
    pub step_type: StepType,
    pub sort_order: i64,
}
