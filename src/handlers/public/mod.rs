mod cart;
mod checkout;
mod payment_return;
mod stats;
mod visit;

pub use cart::*;
pub use checkout::*;
pub use payment_return::*;
pub use stats::*;
pub use visit::*;

use axum::{routing::{get, post}, Json, Router};
use serde::Serialize;

use crate::db::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/funnels/{slug}/visit", post(record_visit))
        .route("/funnels/{slug}/stats", get(funnel_stats))
        .route("/sessions/{uuid}/cart", get(get_cart))
        .route("/sessions/{uuid}/cart/products/{id}", post(toggle_cart_product))
        .route("/sessions/{uuid}/cart/bumps/{id}", post(toggle_cart_bump))
        .route("/sessions/{uuid}/checkout", post(start_checkout))
        // Browser return from the hosted payment page
        .route("/payments/bayarcash/return", get(bayarcash_return))
}
