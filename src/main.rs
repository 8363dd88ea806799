use anyhow::Result;
use tidyflow::storage::Storage;
use tidyflow::transfer::scheduler::SchedulerConfig;
use tidyflow::transfer::{EngineOptions, Scheduler, TransferEngine};
use tidyflow::utils;
use tokio::sync::watch;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    utils::logging::init_tracing();

    let config = utils::config::load_config()?;

    info!("Starting tidyflow v{}", env!("CARGO_PKG_VERSION"));

    // Initialize storage layer
    let storage = Storage::new(&config.database_url).await?;
    storage.run_migrations().await?;
    storage.seed_presets().await?;

    // The shutdown signal stops the scheduler between polls and any
    // in-flight transfer between chunks
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let engine = TransferEngine::new(storage.clone(), EngineOptions::from(&config))
        .with_shutdown(shutdown_rx.clone());

    let scheduler = Scheduler::new(
        storage.clone(),
        engine,
        SchedulerConfig::from(&config),
        shutdown_rx,
    );
    let scheduler_handle = tokio::spawn(scheduler.run());

    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
    let _ = scheduler_handle.await;

    info!("Stopped gracefully");
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
