mod from_row;
mod schema;
pub mod queries;

pub use from_row::{FromRow, query_all, query_one};
pub use schema::init_db;

use std::sync::Arc;
use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::integrations::{AutomationClient, PixelClient};
use crate::payments::{PaymentGateway, StripeClient};

pub type DbPool = Pool<SqliteConnectionManager>;

/// Application state shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    /// Public base URL used for return redirects and gateway callbacks.
    pub base_url: String,
    pub session_ttl_minutes: i64,
    pub default_currency: String,
    /// Bayarcash in production; swapped for a fake in tests.
    pub gateway: Arc<dyn PaymentGateway>,
    /// None when Stripe webhooks are not configured.
    pub stripe: Option<Arc<StripeClient>>,
    pub pixel: Arc<dyn PixelClient>,
    pub automation: Arc<dyn AutomationClient>,
}

/// Per-connection setup: WAL for concurrent readers, a busy timeout so
/// IMMEDIATE transactions queue instead of failing, and foreign keys.
fn configure_connection(conn: &mut rusqlite::Connection) -> rusqlite::Result<()> {
    conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
    conn.busy_timeout(Duration::from_secs(5))?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(())
}

pub fn create_pool(database_path: &str) -> Result<DbPool, r2d2::Error> {
    let manager = SqliteConnectionManager::file(database_path).with_init(configure_connection);
    Pool::builder().max_size(10).build(manager)
}
