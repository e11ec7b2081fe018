//! Dues Service entry point.

use dues_service::config::{DuesConfig, StorageConfig};
use dues_service::startup::Application;

use service_core::observability::init_tracing;
use tokio::signal;

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let config = DuesConfig::from_env().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        std::io::Error::other(format!("Configuration error: {}", e))
    })?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );

    tracing::info!(
        version = %config.service_version,
        otlp_endpoint = ?config.otlp_endpoint,
        "Starting dues-service"
    );

    let storage = match &config.storage {
        StorageConfig::Postgres(_) => "postgres",
        StorageConfig::Memory => "memory",
    };
    tracing::info!(
        service_name = %config.service_name,
        http_port = %config.common.port,
        storage = storage,
        base_currency = %config.ledger.base_currency,
        include_pending_members = config.ledger.include_pending_members,
        include_prospect_members = config.ledger.include_prospect_members,
        sweep_interval_secs = config.ledger.sweep_interval_secs,
        "Configuration loaded"
    );

    let app = Application::build(config).await.map_err(|e| {
        tracing::error!(error = %e, "Failed to build application");
        std::io::Error::other(format!("Application build error: {}", e))
    })?;

    let shutdown = app.shutdown_token();
    let mut server = tokio::spawn(app.run_until_stopped());

    let result = tokio::select! {
        result = &mut server => result,
        _ = shutdown_signal() => {
            tracing::info!("Graceful shutdown initiated");
            shutdown.cancel();
            server.await
        }
    };

    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::error!(error = %e, "Application error");
            return Err(e);
        }
        Err(e) => {
            tracing::error!(error = %e, "Server task failed");
            return Err(std::io::Error::other(e.to_string()));
        }
    }

    tracing::info!("Service shutdown complete");
    Ok(())
}
