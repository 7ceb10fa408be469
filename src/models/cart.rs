use serde::{Deserialize, Serialize};

/// In-progress product/bump selection for a funnel session.
/// Never deleted; pending carts feed abandoned-cart analytics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cart {
    pub id: String,
    pub session_uuid: String,
    pub funnel_id: String,
    pub step_id: Option<String>,
    /// Set semantics, quantity is implicitly 1.
    pub product_ids: Vec<String>,
    pub bump_ids: Vec<String>,
    pub subtotal_cents: i64,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub status: CartStatus,
    pub recovered_order_id: Option<String>,
    pub recovered_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Cart {
    pub fn is_empty(&self) -> bool {
        self.product_ids.is_empty() && self.bump_ids.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CartStatus {
    Pending,
    Recovered,
}

impl CartStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Recovered => "recovered",
        }
    }
}

impl std::str::FromStr for CartStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "recovered" => Ok(Self::Recovered),
            _ => Err(format!("unknown cart status: {}", s)),
        }
    }
}
