pub mod bayarcash;
pub mod common;
pub mod stripe;

pub use bayarcash::handle_bayarcash_callback;
pub use stripe::handle_stripe_webhook;

use axum::{Router, routing::post};

use crate::db::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/webhooks/bayarcash", post(handle_bayarcash_callback))
        .route("/webhooks/stripe", post(handle_stripe_webhook))
}
