//! Funnel visitor tracking: sessions, carts and the daily attribution ledger.

pub mod cart;
pub mod ledger;
pub mod session;

pub use session::TrackedSession;

/// Session event names shared by the tracker, checkout and reconciler.
pub mod events {
    pub const CHECKOUT_STARTED: &str = "checkout_started";
    pub const PAYMENT_COMPLETED: &str = "payment_completed";
    pub const PAYMENT_FAILED: &str = "payment_failed";
}
