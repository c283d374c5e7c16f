//! solarwatch -- anomaly detection for a fleet of solar generation devices.
//!
//! This crate provides the detectors, the dedup gate and per-device
//! orchestration, the finding store and lifecycle, the recurring fleet
//! scheduler, and the HTTP API in front of them.

pub mod api;
pub mod clock;
pub mod config;
pub mod detect;
pub mod error;
pub mod findings;
pub mod import;
pub mod registry;
pub mod scheduler;
pub mod storage;
pub mod telemetry;

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::clock::SystemClock;
use crate::config::Config;
use crate::detect::engine::DetectionEngine;
use crate::storage::Db;

/// Open the configured database and wrap it in the store handle.
pub fn open_db(config: &Config) -> Result<Db> {
    let path = &config.storage.db_path;
    tracing::info!(db_path = %path.display(), "Initializing database");
    let pool = storage::open_pool(path)?;
    Ok(Db::new(pool, &config.storage))
}

/// Start the solarwatch daemon: API server and fleet scheduler.
pub async fn serve(config: Config) -> Result<()> {
    // 1. Initialize Storage
    let db = open_db(&config)?;

    // 2. Detection engine, shared by the scheduler and the API
    let engine = Arc::new(DetectionEngine::new(db.clone(), &config, Arc::new(SystemClock)));

    // 3. Start Scheduler Engine (background task)
    if config.scheduler.enabled {
        let schedule = scheduler::FleetSchedule::parse(&config.scheduler.cron)?;
        let history = scheduler::RunHistory::new(db.clone());
        let engine = engine.clone();
        tokio::spawn(async move {
            scheduler::run_scheduler_loop(schedule, engine, history).await;
        });
    } else {
        tracing::info!("Scheduler disabled by configuration");
    }

    // 4. Start API Server
    let addr: std::net::SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("invalid bind address '{}'", config.server.bind))?;
    let state = api::state::AppState::with_engine(db, &config, engine);
    let app = api::router(state);

    tracing::info!(%addr, "solarwatch listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
