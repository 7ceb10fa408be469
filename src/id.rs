//! Prefixed ID generation for funnelpay entities.
//!
//! Row IDs use an `fp_` brand prefix so they never collide with gateway
//! identifiers (Stripe's `pi_`, `cs_`, Bayarcash transaction ids).
//!
//! Format: `fp_{entity}_{uuid_simple}` (32 hex chars, no hyphens).
//! Session UUIDs and visitor ids are plain v4 UUIDs and are not covered here.

use chrono::NaiveDate;
use uuid::Uuid;

const ALL_PREFIXES: &[&str] = &[
    "fp_fnl_", "fp_stp_", "fp_prd_", "fp_bmp_", "fp_aff_", "fp_crt_", "fp_ord_", "fp_sub_",
    "fp_evt_", "fp_fo_", "fp_afc_",
];

/// Cheap format check to reject garbage path parameters before hitting the database.
pub fn is_valid_prefixed_id(s: &str) -> bool {
    let Some(prefix) = ALL_PREFIXES.iter().find(|p| s.starts_with(*p)) else {
        return false;
    };

    let hex_part = &s[prefix.len()..];
    hex_part.len() == 32 && hex_part.chars().all(|c| c.is_ascii_hexdigit())
}

#[derive(Debug, Clone, Copy)]
pub enum EntityType {
    Funnel,
    FunnelStep,
    FunnelProduct,
    FunnelBump,
    FunnelAffiliate,
    Cart,
    ProductOrder,
    SubscriptionOrder,
    SessionEvent,
    FunnelOrder,
    AffiliateConversion,
}

impl EntityType {
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Funnel => "fp_fnl",
            Self::FunnelStep => "fp_stp",
            Self::FunnelProduct => "fp_prd",
            Self::FunnelBump => "fp_bmp",
            Self::FunnelAffiliate => "fp_aff",
            Self::Cart => "fp_crt",
            Self::ProductOrder => "fp_ord",
            Self::SubscriptionOrder => "fp_sub",
            Self::SessionEvent => "fp_evt",
            Self::FunnelOrder => "fp_fo",
            Self::AffiliateConversion => "fp_afc",
        }
    }

    pub fn gen_id(&self) -> String {
        format!("{}_{}", self.prefix(), Uuid::new_v4().as_simple())
    }
}

/// Business-key order number: `ORD-<YYYYMMDD>-<8 hex>`.
pub fn gen_order_number(date: NaiveDate) -> String {
    let suffix = Uuid::new_v4().as_simple().to_string();
    format!(
        "ORD-{}-{}",
        date.format("%Y%m%d"),
        suffix[..8].to_ascii_uppercase()
    )
}
