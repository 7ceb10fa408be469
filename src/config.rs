use std::env;
use std::time::Duration;

use crate::models::{BayarcashConfig, StripeConfig};

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    pub base_url: String,
    pub dev_mode: bool,
    pub bayarcash: BayarcashConfig,
    pub stripe: Option<StripeConfig>,
    /// Base URL of the conversions API used for server-side purchase pixels.
    /// Unset disables pixel firing for every funnel.
    pub pixel_api_url: Option<String>,
    /// Receives `purchase_completed` automation events (lifecycle emails etc.)
    pub automation_webhook_url: Option<String>,
    pub outbound_timeout: Duration,
    /// Sessions idle longer than this are no longer resumed.
    pub session_ttl_minutes: i64,
    pub default_currency: String,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let dev_mode = env::var("FUNNELPAY_ENV")
            .map(|v| v == "dev" || v == "development")
            .unwrap_or(false);

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);

        let base_url = env::var("BASE_URL")
            .unwrap_or_else(|_| format!("http://{}:{}", host, port))
            .trim_end_matches('/')
            .to_string();

        let bayarcash = BayarcashConfig {
            api_url: env::var("BAYARCASH_API_URL")
                .unwrap_or_else(|_| "https://console.bayar.cash/api/v2".to_string()),
            api_token: env::var("BAYARCASH_API_TOKEN").unwrap_or_default(),
            secret_key: env::var("BAYARCASH_SECRET_KEY").unwrap_or_default(),
            portal_key: env::var("BAYARCASH_PORTAL_KEY").unwrap_or_default(),
        };

        if bayarcash.secret_key.is_empty() {
            tracing::warn!("BAYARCASH_SECRET_KEY is not set - every Bayarcash checksum will fail");
        }

        let stripe = env::var("STRIPE_WEBHOOK_SECRET")
            .ok()
            .filter(|v| !v.is_empty())
            .map(|webhook_secret| StripeConfig { webhook_secret });

        let outbound_timeout = env::var("OUTBOUND_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(5));

        Self {
            host,
            port,
            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "funnelpay.db".to_string()),
            base_url,
            dev_mode,
            bayarcash,
            stripe,
            pixel_api_url: env::var("PIXEL_API_URL").ok().filter(|v| !v.is_empty()),
            automation_webhook_url: env::var("AUTOMATION_WEBHOOK_URL")
                .ok()
                .filter(|v| !v.is_empty()),
            outbound_timeout,
            session_ttl_minutes: env::var("SESSION_TTL_MINUTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1440),
            default_currency: env::var("DEFAULT_CURRENCY").unwrap_or_else(|_| "MYR".to_string()),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
