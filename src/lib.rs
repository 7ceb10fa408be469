//! funnelpay - funnel checkout reconciliation and conversion attribution
//!
//! Tracks funnel sessions and carts, reconciles gateway payment callbacks and
//! browser returns into a single order state, and attributes each paid order
//! to its funnel, step, session and affiliate exactly once.

pub mod checkout;
pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod id;
pub mod integrations;
pub mod models;
pub mod payments;
pub mod reconcile;
pub mod tracking;
pub mod util;
