use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BayarcashConfig {
    pub api_url: String,
    pub api_token: String,
    /// HMAC key for callback and return checksums.
    pub secret_key: String,
    pub portal_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StripeConfig {
    /// `whsec_...` signing secret for `Stripe-Signature` verification.
    pub webhook_secret: String,
}
