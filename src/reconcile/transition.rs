//! Order status transition table.
//!
//! ```text
//! stored \ incoming | pending   | processing          | paid      | failed
//! pending           | already   | apply               | apply     | apply
//! processing        | invalid   | apply if new txn    | apply     | apply
//! paid              | invalid   | invalid             | already   | invalid
//! failed            | invalid   | invalid             | invalid   | already
//! ```

use crate::models::OrderStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    Apply,
    /// Same outcome already recorded; succeed without side effects.
    AlreadyProcessed,
    /// Would regress or contradict a settled order; ignore.
    Invalid,
}

pub fn plan(
    stored: OrderStatus,
    stored_txn: Option<&str>,
    incoming: OrderStatus,
    incoming_txn: Option<&str>,
) -> Plan {
    use OrderStatus::*;

    match (stored, incoming) {
        (a, b) if a == b && a != Processing => Plan::AlreadyProcessed,
        (Processing, Processing) => match incoming_txn {
            Some(txn) if Some(txn) != stored_txn => Plan::Apply,
            _ => Plan::AlreadyProcessed,
        },
        (Paid | Failed, _) => Plan::Invalid,
        (Processing, Pending) => Plan::Invalid,
        (Pending, _) | (Processing, _) => Plan::Apply,
    }
}
