use serde::{Deserialize, Serialize};

use super::OrderKind;

/// Per-day counters for a funnel (`step_id = None`) or a single step.
/// Counters only ever grow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyCounter {
    pub funnel_id: String,
    pub step_id: Option<String>,
    /// `YYYY-MM-DD` in the server's local time zone.
    pub stat_date: String,
    pub visitors: i64,
    pub pageviews: i64,
    pub conversions: i64,
    pub revenue_cents: i64,
}

/// Affiliate credit, written once per converted order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AffiliateConversion {
    pub id: String,
    pub funnel_id: String,
    pub affiliate_id: String,
    pub session_uuid: String,
    pub order_kind: OrderKind,
    pub order_id: String,
    pub revenue_cents: i64,
    pub created_at: i64,
}

/// Additive change applied to a daily counter row in one UPDATE.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterDelta {
    pub visitors: i64,
    pub pageviews: i64,
    pub conversions: i64,
    pub revenue_cents: i64,
}

impl CounterDelta {
    pub fn visitor() -> Self {
        Self { visitors: 1, ..Default::default() }
    }

    pub fn pageview() -> Self {
        Self { pageviews: 1, ..Default::default() }
    }

    pub fn conversion(revenue_cents: i64) -> Self {
        Self {
            conversions: 1,
            revenue_cents,
            ..Default::default()
        }
    }
}
