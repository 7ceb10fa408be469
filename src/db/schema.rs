use rusqlite::Connection;

/// Initialize the database schema. Idempotent.
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        -- Funnel catalog (owned by the back office, read here)
        CREATE TABLE IF NOT EXISTS funnels (
            id TEXT PRIMARY KEY,
            slug TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'published',
            pixel_id TEXT,
            pixel_access_token TEXT,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS funnel_steps (
            id TEXT PRIMARY KEY,
            funnel_id TEXT NOT NULL REFERENCES funnels(id) ON DELETE CASCADE,
            slug TEXT NOT NULL,
            step_type TEXT NOT NULL CHECK (step_type IN ('landing', 'optin', 'sales', 'checkout', 'upsell', 'downsell', 'thankyou')),
            sort_order INTEGER NOT NULL DEFAULT 0,

            UNIQUE(funnel_id, slug)
        );
        CREATE INDEX IF NOT EXISTS idx_funnel_steps_type ON funnel_steps(funnel_id, step_type, sort_order);

        CREATE TABLE IF NOT EXISTS funnel_products (
            id TEXT PRIMARY KEY,
            funnel_id TEXT NOT NULL REFERENCES funnels(id) ON DELETE CASCADE,
            step_id TEXT REFERENCES funnel_steps(id) ON DELETE SET NULL,
            name TEXT NOT NULL,
            funnel_price_cents INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_funnel_products_funnel ON funnel_products(funnel_id);

        CREATE TABLE IF NOT EXISTS funnel_bumps (
            id TEXT PRIMARY KEY,
            funnel_id TEXT NOT NULL REFERENCES funnels(id) ON DELETE CASCADE,
            step_id TEXT REFERENCES funnel_steps(id) ON DELETE SET NULL,
            name TEXT NOT NULL,
            price_cents INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_funnel_bumps_funnel ON funnel_bumps(funnel_id);

        CREATE TABLE IF NOT EXISTS funnel_affiliates (
            id TEXT PRIMARY KEY,
            funnel_id TEXT NOT NULL REFERENCES funnels(id) ON DELETE CASCADE,
            affiliate_id TEXT NOT NULL,
            ref_code TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'active' CHECK (status IN ('active', 'inactive')),

            UNIQUE(funnel_id, ref_code)
        );
        CREATE INDEX IF NOT EXISTS idx_funnel_affiliates_affiliate ON funnel_affiliates(funnel_id, affiliate_id);

        -- Funnel sessions (visitor journeys, not auth sessions)
        CREATE TABLE IF NOT EXISTS funnel_sessions (
            uuid TEXT PRIMARY KEY,
            funnel_id TEXT NOT NULL REFERENCES funnels(id) ON DELETE CASCADE,
            visitor_id TEXT NOT NULL,
            affiliate_id TEXT,
            entry_step_id TEXT,
            current_step_id TEXT,
            email TEXT,
            phone TEXT,
            status TEXT NOT NULL DEFAULT 'active' CHECK (status IN ('active', 'converted', 'expired')),
            utm_source TEXT,
            utm_medium TEXT,
            utm_campaign TEXT,
            utm_content TEXT,
            utm_term TEXT,
            referrer TEXT,
            ip_address TEXT,
            user_agent TEXT,
            started_at INTEGER NOT NULL,
            last_activity_at INTEGER NOT NULL,
            converted_at INTEGER
        );
        -- At most one active session per visitor per funnel
        CREATE UNIQUE INDEX IF NOT EXISTS idx_funnel_sessions_active_visitor
            ON funnel_sessions(funnel_id, visitor_id) WHERE status = 'active';
        CREATE INDEX IF NOT EXISTS idx_funnel_sessions_activity
            ON funnel_sessions(last_activity_at) WHERE status = 'active';

        -- Steps already credited for a session on a given day
        CREATE TABLE IF NOT EXISTS session_step_visits (
            session_uuid TEXT NOT NULL REFERENCES funnel_sessions(uuid) ON DELETE CASCADE,
            step_id TEXT NOT NULL,
            visit_date TEXT NOT NULL,
            created_at INTEGER NOT NULL,

            PRIMARY KEY (session_uuid, step_id, visit_date)
        );

        -- Append-only telemetry
        CREATE TABLE IF NOT EXISTS session_events (
            id TEXT PRIMARY KEY,
            session_uuid TEXT NOT NULL,
            funnel_id TEXT NOT NULL,
            step_id TEXT,
            event_name TEXT NOT NULL,
            payload TEXT NOT NULL DEFAULT '{}',
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_session_events_session ON session_events(session_uuid, created_at);

        -- Carts (1:1 with session, never deleted)
        CREATE TABLE IF NOT EXISTS carts (
            id TEXT PRIMARY KEY,
            session_uuid TEXT NOT NULL UNIQUE REFERENCES funnel_sessions(uuid) ON DELETE CASCADE,
            funnel_id TEXT NOT NULL,
            step_id TEXT,
            product_ids TEXT NOT NULL DEFAULT '[]',
            bump_ids TEXT NOT NULL DEFAULT '[]',
            subtotal_cents INTEGER NOT NULL DEFAULT 0,
            email TEXT,
            phone TEXT,
            status TEXT NOT NULL DEFAULT 'pending' CHECK (status IN ('pending', 'recovered')),
            recovered_order_id TEXT,
            recovered_at INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_carts_abandoned ON carts(funnel_id, updated_at) WHERE status = 'pending';

        -- Commerce orders
        CREATE TABLE IF NOT EXISTS product_orders (
            id TEXT PRIMARY KEY,
            order_number TEXT NOT NULL UNIQUE,
            transaction_id TEXT,
            total_cents INTEGER NOT NULL,
            currency TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending' CHECK (status IN ('pending', 'processing', 'paid', 'failed')),
            payment_status TEXT NOT NULL DEFAULT 'unpaid' CHECK (payment_status IN ('unpaid', 'pending', 'paid', 'failed')),
            payment_channel TEXT CHECK (payment_channel IN ('callback', 'return')),
            metadata TEXT NOT NULL DEFAULT '{}',
            conversion_tracked INTEGER NOT NULL DEFAULT 0,
            email TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            paid_at INTEGER
        );

        -- Subscription orders (same core columns)
        CREATE TABLE IF NOT EXISTS subscription_orders (
            id TEXT PRIMARY KEY,
            order_number TEXT NOT NULL UNIQUE,
            transaction_id TEXT,
            total_cents INTEGER NOT NULL,
            currency TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending' CHECK (status IN ('pending', 'processing', 'paid', 'failed')),
            payment_status TEXT NOT NULL DEFAULT 'unpaid' CHECK (payment_status IN ('unpaid', 'pending', 'paid', 'failed')),
            payment_channel TEXT CHECK (payment_channel IN ('callback', 'return')),
            metadata TEXT NOT NULL DEFAULT '{}',
            conversion_tracked INTEGER NOT NULL DEFAULT 0,
            email TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            paid_at INTEGER
        );

        -- Order <-> funnel/step/session linkage with denormalized revenue
        CREATE TABLE IF NOT EXISTS funnel_orders (
            id TEXT PRIMARY KEY,
            funnel_id TEXT NOT NULL REFERENCES funnels(id) ON DELETE CASCADE,
            step_id TEXT,
            session_uuid TEXT,
            order_kind TEXT NOT NULL CHECK (order_kind IN ('product', 'subscription')),
            order_id TEXT NOT NULL,
            order_number TEXT NOT NULL,
            revenue_cents INTEGER NOT NULL,
            affiliate_id TEXT,
            created_at INTEGER NOT NULL,

            UNIQUE(order_kind, order_id)
        );
        CREATE INDEX IF NOT EXISTS idx_funnel_orders_funnel ON funnel_orders(funnel_id, created_at);

        -- Daily counters. Rows are only ever incremented.
        CREATE TABLE IF NOT EXISTS funnel_daily_stats (
            funnel_id TEXT NOT NULL,
            stat_date TEXT NOT NULL,
            visitors INTEGER NOT NULL DEFAULT 0,
            pageviews INTEGER NOT NULL DEFAULT 0,
            conversions INTEGER NOT NULL DEFAULT 0,
            revenue_cents INTEGER NOT NULL DEFAULT 0,

            PRIMARY KEY (funnel_id, stat_date)
        );

        CREATE TABLE IF NOT EXISTS funnel_step_daily_stats (
            funnel_id TEXT NOT NULL,
            step_id TEXT NOT NULL,
            stat_date TEXT NOT NULL,
            visitors INTEGER NOT NULL DEFAULT 0,
            pageviews INTEGER NOT NULL DEFAULT 0,
            conversions INTEGER NOT NULL DEFAULT 0,
            revenue_cents INTEGER NOT NULL DEFAULT 0,

            PRIMARY KEY (funnel_id, step_id, stat_date)
        );

        -- Affiliate credit, one row per converted order
        CREATE TABLE IF NOT EXISTS affiliate_conversions (
            id TEXT PRIMARY KEY,
            funnel_id TEXT NOT NULL,
            affiliate_id TEXT NOT NULL,
            session_uuid TEXT NOT NULL,
            order_kind TEXT NOT NULL,
            order_id TEXT NOT NULL,
            revenue_cents INTEGER NOT NULL,
            created_at INTEGER NOT NULL,

            UNIQUE(order_kind, order_id)
        );
        CREATE INDEX IF NOT EXISTS idx_affiliate_conversions_affiliate ON affiliate_conversions(affiliate_id, created_at);

        -- Webhook replay protection
        CREATE TABLE IF NOT EXISTS webhook_events (
            provider TEXT NOT NULL,
            event_id TEXT NOT NULL,
            created_at INTEGER NOT NULL,

            PRIMARY KEY (provider, event_id)
        );
        CREATE INDEX IF NOT EXISTS idx_webhook_events_created ON webhook_events(created_at);
        "#,
    )
}
