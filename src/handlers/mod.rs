pub mod public;
pub mod webhooks;

use axum::Router;

use crate::db::AppState;

/// Every public and webhook route, before state and layers are applied.
pub fn router() -> Router<AppState> {
    Router::new()
        .merge(public::router())
        .merge(webhooks::router())
}
