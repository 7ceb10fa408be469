mod cart;
mod funnel;
mod order;
mod payment_config;
mod session;
mod stats;

pub use cart::*;
pub use funnel::*;
pub use order::*;
pub use payment_config::*;
pub use session::*;
pub use stats::*;
