//! Stock simulation - main entry point

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stock_sim::{
    Database, GameConfig, ManagerConfig, MatchingConfig, MatchingEngine, NpcConfig, NpcManager,
};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("🚀 Starting stock simulation");

    let db_path = std::env::var("STOCK_SIM_DB").unwrap_or_else(|_| "data/stock-sim.db".into());
    if let Some(parent) = std::path::Path::new(&db_path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    let db = Arc::new(Database::open(&db_path)?);
    db.seed_settings(&GameConfig::default())?;
    tracing::info!("💾 Database ready at {}", db_path);

    let manager = Arc::new(NpcManager::new(
        db.clone(),
        NpcConfig::default(),
        ManagerConfig::default(),
    ));

    // Seed the market with a handful of NPC traders
    let npc_count: usize = std::env::var("STOCK_SIM_NPCS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(4);
    for i in 1..=npc_count {
        manager.start_npc(&format!("npc-{i}"))?;
    }
    tracing::info!("🤖 Started {} NPCs", npc_count);

    let cancel = CancellationToken::new();
    let engine = MatchingEngine::new(db.clone(), MatchingConfig::default());
    let engine_task = {
        let token = cancel.clone();
        tokio::spawn(async move { engine.run(token).await })
    };

    tokio::signal::ctrl_c().await?;
    tracing::info!("🛑 Shutting down...");

    manager.stop_all_and_clear().await;
    cancel.cancel();
    if tokio::time::timeout(SHUTDOWN_GRACE, engine_task).await.is_err() {
        tracing::warn!("matching engine did not stop within grace period");
    }

    tracing::info!("👋 Simulation exited");
    Ok(())
}
