#![forbid(unsafe_code)]

mod engine;
mod metrics;
mod registry;
mod sdp;
mod signaling;
mod whip;

use anyhow::Result;
use engine::{EngineConfig, MediaEngine};
use metrics::ServerMetrics;
use registry::ProducerRegistry;
use signaling::SignalingServer;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use whip::WhipResources;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "whipcast=debug,mediasoup=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Whipcast - Starting server");

    // Engine configuration from environment (ANNOUNCE_IP, RTC_PORT)
    let config = EngineConfig::from_env()?;

    let engine = Arc::new(MediaEngine::new(&config).await?);
    let mut engine_death = engine.death_watch();
    info!("Media engine initialized");

    let metrics = ServerMetrics::new();
    let registry = Arc::new(ProducerRegistry::new());
    let whip = WhipResources::new(Arc::clone(&engine), Arc::clone(&registry), metrics.clone());

    let server = SignalingServer::new(Arc::clone(&engine), registry, whip, metrics);
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);

    // Run until Ctrl+C or worker death. Worker death is unrecoverable: no
    // routing context survives it, so exit with a failure for the supervisor.
    tokio::select! {
        result = server.serve(port) => {
            if let Err(e) = result {
                error!("Server error: {e}");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
            engine.shutdown();
        }
        _ = engine_death.changed() => {
            let reason = engine_death
                .borrow()
                .clone()
                .unwrap_or_else(|| "unknown".to_string());
            error!("Media engine worker died: {reason}");
            anyhow::bail!("media engine worker died: {reason}");
        }
    }

    info!("Server shutdown complete");
    Ok(())
}
