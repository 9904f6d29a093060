//! Game-credit checkout server
//!
//! Axum server that opens Stripe checkout sessions for game-credit
//! purchases, records each attempt, and reconciles payment status through
//! client verification and Stripe webhooks.

mod config;
mod cors;
mod error;
mod handlers;
mod rate_limit;
mod routes;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use credit_payments::{
    MemoryTransactionStore, OrphanSweeper, PaymentProvider, PgTransactionStore, StripeProvider,
    TransactionStore,
};

use crate::config::Config;
use crate::routes::create_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    // Transaction store
    let (store, store_kind): (Arc<dyn TransactionStore>, &'static str) =
        if config.uses_memory_store() {
            tracing::warn!("⚠ Using in-memory transaction store - records are lost on restart");
            (Arc::new(MemoryTransactionStore::new()), "memory")
        } else {
            let store =
                PgTransactionStore::connect(&config.database_url, config.request_timeout).await?;
            tracing::info!("✓ Connected to transaction store");
            (Arc::new(store), "postgres")
        };

    // Payment provider
    let provider: Arc<dyn PaymentProvider> = Arc::new(
        StripeProvider::new(&config.stripe_secret_key).with_timeout(config.request_timeout),
    );
    tracing::info!("✓ Stripe configured");

    let state = AppState::new(store.clone(), store_kind, provider, &config);

    // Background maintenance
    let sweeper = OrphanSweeper::new(store, config.orphan_max_age);
    tokio::spawn(sweeper.run(config.orphan_sweep_interval));

    let rate_limit = state.checkout_rate_limit.clone();
    let prune_every = config.checkout_rate_limit.window;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(prune_every);
        loop {
            ticker.tick().await;
            rate_limit.prune();
        }
    });

    let app = create_router(state, &config);

    // Start server
    let addr = config.socket_addr();
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("🚀 credit-server running on http://{}", addr);
    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("");
    tracing::info!("Endpoints:");
    tracing::info!("  GET  /                             - Banner");
    tracing::info!("  GET  /api/health                   - Health check");
    tracing::info!("  POST /api/create-checkout-session  - Start Stripe checkout");
    tracing::info!("  POST /api/verify-payment           - Verify a checkout session");
    tracing::info!("  GET  /api/transactions             - Recent transactions");
    tracing::info!("  POST /api/webhook                  - Stripe webhook");
    tracing::info!("");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
