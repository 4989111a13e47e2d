// Blind Contest Engine - Main Entry Point

use std::sync::Arc;

use blind_contest_engine::{build_router, AppState, EngineConfig, SharedState, SledStore};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    let config = EngineConfig::from_env();
    tracing_subscriber::fmt().with_max_level(config.log_level).init();

    info!("═══════════════════════════════════════════════");
    info!("     🍷 Blind Contest & Wagering Engine");
    info!("═══════════════════════════════════════════════");

    if let Err(e) = run(config).await {
        error!("❌ {}", e);
        std::process::exit(1);
    }
}

async fn run(config: EngineConfig) -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(SledStore::open(&config.data_dir)?);
    let (app, receiver) = AppState::load(config.clone(), &store)?;
    let state: SharedState = Arc::new(app);

    if let Err(e) = state.engine.verify_ledger() {
        warn!("⚠️ Ledger integrity check failed on startup: {}", e);
    }

    // Activity channel -> in-memory feed
    tokio::spawn(receiver.run(state.feed.clone()));

    // Periodic snapshots
    if !config.snapshot_interval.is_zero() {
        let state = state.clone();
        let store = store.clone();
        let period = config.snapshot_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = state.snapshot(&store) {
                    warn!("⚠️ Snapshot failed: {}", e);
                }
            }
        });
    }

    let app = build_router(state.clone());
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;

    info!("🚀 Server running on http://{}", config.bind_addr);
    info!("📋 Endpoints:");
    info!("   POST /trips/:trip/members         - Join a trip (funds new members)");
    info!("   POST /contests                    - Create contest");
    info!("   POST /contests/:id/entries        - Submit blind entry");
    info!("   POST /contests/:id/bags           - Assign bag numbers, start scoring");
    info!("   POST /contests/:id/phase          - Advance phase");
    info!("   POST /contests/:id/ballots        - Submit top-3 ballot");
    info!("   POST /contests/:id/wagers         - Place or update wager");
    info!("   GET  /contests/:id/placement      - Final placement after reveal");
    info!("   GET  /balance/:participant        - Virtual currency balance");
    info!("   GET  /activity                    - Recent activity");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("💾 Saving state to disk...");
    let stats = state.snapshot(&store)?;
    info!(
        "✅ Saved {} contests, {} new ledger rows. Goodbye!",
        stats.contests, stats.ledger_rows_written
    );
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("⚠️ Failed to install CTRL+C handler: {}", e);
        std::future::pending::<()>().await;
    }
    info!("🛑 Shutdown signal received");
}
