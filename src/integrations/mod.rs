//! Outbound collaborators fired after a conversion commits. Both are
//! best-effort: a failure is logged by the caller and never rolls back
//! the order.

mod automation;
mod pixel;

pub use automation::*;
pub use pixel::*;
