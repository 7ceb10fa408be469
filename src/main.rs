use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use futures::FutureExt;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use funnelpay::config::Config;
use funnelpay::db::{AppState, create_pool, init_db, queries};
use funnelpay::handlers;
use funnelpay::integrations::{
    AutomationClient, HttpPixelClient, NoopAutomationClient, NoopPixelClient, PixelClient,
    WebhookAutomationClient,
};
use funnelpay::models::{CreateFunnel, CreateFunnelStep, StepType};
use funnelpay::payments::{BayarcashClient, StripeClient};
use funnelpay::tracking::session;

/// Replayed Stripe event ids are remembered this long.
const WEBHOOK_EVENT_RETENTION_DAYS: i64 = 30;

#[derive(Parser, Debug)]
#[command(name = "funnelpay")]
#[command(about = "Funnel checkout reconciliation and conversion attribution")]
struct Cli {
    /// Seed a demo funnel (landing, checkout and thank-you steps, products, a bump, an affiliate)
    #[arg(long)]
    seed: bool,

    /// Delete the database on exit (dev mode only)
    #[arg(long)]
    ephemeral: bool,
}

/// Seeds one demo funnel. Only runs in dev mode and when the slug is free.
fn seed_dev_data(state: &AppState) {
    let conn = state.db.get().expect("Failed to get db connection for seeding");

    if queries::get_funnel_by_slug(&conn, "demo")
        .expect("Failed to look up demo funnel")
        .is_some()
    {
        tracing::info!("Demo funnel already exists, skipping seed");
        return;
    }

    let funnel = queries::create_funnel(
        &conn,
        &CreateFunnel {
            slug: "demo".into(),
            name: "Demo Funnel".into(),
            pixel_id: None,
            pixel_access_token: None,
        },
    )
    .expect("Failed to create demo funnel");

    let mut checkout_step = None;
    for (sort_order, (slug, step_type)) in [
        ("landing", StepType::Landing),
        ("checkout", StepType::Checkout),
        ("thank-you", StepType::Thankyou),
    ]
    .into_iter()
    .enumerate()
    {
        let step = queries::create_funnel_step(
            &conn,
            &funnel.id,
            &CreateFunnelStep {
                slug: slug.into(),
                step_type,
                sort_order: sort_order as i64,
            },
        )
        .expect("Failed to create demo step");
        if step_type == StepType::Checkout {
            checkout_step = Some(step);
        }
    }
    let checkout_step_id = checkout_step.as_ref().map(|s| s.id.as_str());

    let ebook = queries::create_funnel_product(&conn, &funnel.id, checkout_step_id, "Ebook", 4900)
        .expect("Failed to create demo product");
    let course = queries::create_funnel_product(&conn, &funnel.id, checkout_step_id, "Video course", 19900)
        .expect("Failed to create demo product");
    let bump = queries::create_funnel_bump(&conn, &funnel.id, checkout_step_id, "Workbook", 1900)
        .expect("Failed to create demo bump");
    let affiliate = queries::create_funnel_affiliate(&conn, &funnel.id, "aff_demo", "DEMO10")
        .expect("Failed to create demo affiliate");

    tracing::info!("============================================");
    tracing::info!("SEEDED DEMO FUNNEL");
    tracing::info!("Funnel: {} (id: {})", funnel.slug, funnel.id);
    tracing::info!("Products: {}, {}", ebook.id, course.id);
    tracing::info!("Bump: {}", bump.id);
    tracing::info!("Referral code: {}", affiliate.ref_code);
    tracing::info!("============================================");
}

fn sweep(state: &AppState) {
    let conn = match state.db.get() {
        Ok(conn) => conn,
        Err(e) => {
            tracing::warn!("Failed to get db connection for sweep: {}", e);
            return;
        }
    };

    match session::expire_idle_sessions(&conn, state.session_ttl_minutes) {
        Ok(count) if count > 0 => tracing::info!("Expired {} idle funnel sessions", count),
        Ok(_) => {}
        Err(e) => tracing::warn!("Failed to expire idle sessions: {}", e),
    }

    match queries::purge_old_webhook_events(&conn, WEBHOOK_EVENT_RETENTION_DAYS) {
        Ok(count) if count > 0 => tracing::debug!("Purged {} old webhook events", count),
        Ok(_) => {}
        Err(e) => tracing::warn!("Failed to purge webhook events: {}", e),
    }
}

/// Hourly maintenance. A panicking pass is logged and the loop continues.
fn spawn_sweep_task(state: AppState) {
    tokio::spawn(async move {
        let interval = Duration::from_secs(60 * 60);
        loop {
            tokio::time::sleep(interval).await;
            let pass = AssertUnwindSafe(async { sweep(&state) }).catch_unwind().await;
            if let Err(panic) = pass {
                let panic_msg = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!("Session sweep panicked: {}", panic_msg);
            }
        }
    });
    tracing::info!("Background session sweep started (runs hourly)");
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "funnelpay=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();

    if config.dev_mode {
        tracing::info!("Running in DEVELOPMENT mode");
    }

    let db_pool = create_pool(&config.database_path).expect("Failed to create database pool");
    {
        let conn = db_pool.get().expect("Failed to get connection");
        init_db(&conn).expect("Failed to initialize database");
    }

    let http = reqwest::Client::builder()
        .user_agent(concat!("funnelpay/", env!("CARGO_PKG_VERSION")))
        .build()
        .expect("Failed to build HTTP client");

    let pixel: Arc<dyn PixelClient> = match config.pixel_api_url.as_deref() {
        Some(url) => Arc::new(HttpPixelClient::new(http.clone(), url, config.outbound_timeout)),
        None => {
            tracing::info!("PIXEL_API_URL not set, server-side purchase pixels disabled");
            Arc::new(NoopPixelClient)
        }
    };
    let automation: Arc<dyn AutomationClient> = match config.automation_webhook_url.as_deref() {
        Some(url) => Arc::new(WebhookAutomationClient::new(http.clone(), url, config.outbound_timeout)),
        None => Arc::new(NoopAutomationClient),
    };
    if config.stripe.is_none() {
        tracing::info!("STRIPE_WEBHOOK_SECRET not set, Stripe webhooks disabled");
    }

    let state = AppState {
        db: db_pool,
        base_url: config.base_url.clone(),
        session_ttl_minutes: config.session_ttl_minutes,
        default_currency: config.default_currency.clone(),
        gateway: Arc::new(BayarcashClient::new(
            http,
            &config.bayarcash,
            &config.base_url,
            config.outbound_timeout,
        )),
        stripe: config.stripe.as_ref().map(|c| Arc::new(StripeClient::new(c))),
        pixel,
        automation,
    };

    if cli.seed {
        if !config.dev_mode {
            tracing::warn!("--seed flag ignored: not in dev mode (set FUNNELPAY_ENV=dev)");
        } else {
            seed_dev_data(&state);
        }
    }

    spawn_sweep_task(state.clone());

    let app = handlers::router()
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    let cleanup_on_exit = cli.ephemeral && config.dev_mode;
    let db_path = config.database_path.clone();

    if cleanup_on_exit {
        tracing::info!("EPHEMERAL MODE: database will be deleted on exit");
    }

    tracing::info!("funnelpay listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Failed to start server");

    if cleanup_on_exit {
        tracing::info!("Cleaning up ephemeral database...");
        if let Err(e) = std::fs::remove_file(&db_path) {
            tracing::warn!("Failed to remove {}: {}", db_path, e);
        } else {
            tracing::info!("Removed {}", db_path);
        }
        let _ = std::fs::remove_file(format!("{}-wal", db_path));
        let _ = std::fs::remove_file(format!("{}-shm", db_path));
    }
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    tracing::info!("Shutdown signal received, stopping server...");
}
