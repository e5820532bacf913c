use stegnox::{app_state::AppState, config::AppConfig};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting stegnox analysis worker");

    let config = AppConfig::from_env().expect("Failed to load configuration");

    // A separate process only sees the server's jobs through shared backends
    if config.database_url.is_none() || config.redis_url.is_none() {
        tracing::error!("DATABASE_URL and REDIS_URL must be set for a standalone worker");
        std::process::exit(1);
    }

    let state = AppState::from_config(&config)
        .await
        .expect("Failed to initialize backends");

    let shutdown = CancellationToken::new();
    let workers = state.spawn_workers(&config, config.worker_count.max(1), &shutdown);

    tracing::info!("Worker ready, processing jobs");

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown requested, finishing in-flight jobs");
    shutdown.cancel();

    for handle in workers {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Worker task panicked");
        }
    }
}
