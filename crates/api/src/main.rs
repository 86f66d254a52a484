use std::sync::Arc;

use anyhow::Context;

use itsm_reporting_infra::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    itsm_reporting_observability::init();

    let config = Config::from_env().context("invalid configuration")?;
    tracing::info!(config = ?config, "configuration loaded");

    let services = Arc::new(
        itsm_reporting_api::app::services::build_services(&config)
            .await
            .context("failed to wire services")?,
    );
    let processor = services
        .processor
        .start()
        .await
        .context("failed to start job processor")?;

    let app = itsm_reporting_api::app::build_app(services);

    let listener = tokio::net::TcpListener::bind(&config.server.bind_address)
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind_address))?;
    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server failed")?;

    tracing::info!("http server stopped, shutting down job processor");
    if tokio::time::timeout(config.server.shutdown_timeout, processor.shutdown())
        .await
        .is_err()
    {
        tracing::warn!("job processor did not stop within the shutdown timeout");
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received");
}
