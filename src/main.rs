// =============================================================================
// Arm Orchestrator — Main Entry Point
// =============================================================================
//
// Boots the single orchestrator task, the metrics timer and the HTTP/WS edge.
// All decision state starts empty: arms appear once a `strategy.catalog`
// event arrives.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod arena;
mod decision;
mod eligibility;
mod errors;
mod event_loop;
mod events;
mod feedback;
mod guard;
mod metrics;
mod orchestrator;
mod reactors;
mod runtime_config;
mod types;

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::orchestrator::Orchestrator;
use crate::runtime_config::OrchestratorConfig;

const CONFIG_PATH: &str = "orchestrator_config.json";
/// Produced events buffered per WebSocket subscriber.
const EVENT_BUS_CAPACITY: usize = 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Arm Orchestrator — Starting Up                    ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let mut config = OrchestratorConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        OrchestratorConfig::default()
    });

    if let Ok(seed) = std::env::var("ORCH_RNG_SEED") {
        match seed.trim().parse::<u64>() {
            Ok(seed) => config.rng_seed = seed,
            Err(e) => warn!(value = %seed, error = %e, "ORCH_RNG_SEED is not a u64, keeping configured seed"),
        }
    }

    info!(
        rng_seed = config.rng_seed,
        min_samples_to_exploit = config.min_samples_to_exploit,
        ucb_z = config.ucb_z,
        illiquid_blocks = config.illiquid_blocks,
        safe_fallback = %config.safe_fallback.strategy,
        metrics_flush_secs = config.metrics_flush_secs,
        "Orchestrator configuration"
    );

    // ── 2. Shared state & orchestrator task ──────────────────────────────
    let (commands, mailbox) = event_loop::channel();
    let (bus, _) = broadcast::channel(EVENT_BUS_CAPACITY);
    let state = Arc::new(AppState::new(config.clone(), commands, bus));

    tokio::spawn(event_loop::run(Orchestrator::new(config.clone()), state.clone(), mailbox));

    // ── 3. Metrics flush loop ────────────────────────────────────────────
    let flush_period = tokio::time::Duration::from_secs(config.metrics_flush_secs.max(1));
    tokio::spawn(metrics::run_flush_loop(state.clone(), flush_period));

    // ── 4. Start the API server ──────────────────────────────────────────
    let api_state = state.clone();
    let bind_addr = std::env::var("ORCH_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3002".into());

    tokio::spawn(async move {
        let app = api::rest::router(api_state);
        let listener = tokio::net::TcpListener::bind(&bind_addr)
            .await
            .expect("Failed to bind API server");
        info!(addr = %bind_addr, "API server listening");
        axum::serve(listener, app).await.expect("API server failed");
    });

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 5. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received — stopping gracefully");

    if let Err(e) = state.runtime_config.read().save(CONFIG_PATH) {
        error!(error = %e, "Failed to save orchestrator config on shutdown");
    }

    info!("Arm Orchestrator shut down complete.");
    Ok(())
}
