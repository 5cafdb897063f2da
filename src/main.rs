use std::sync::Arc;

use proctor_hub::api;
use proctor_hub::config::{Config, LogFormat, LoggingConfig};
use proctor_hub::proctoring::ProctoringServer;

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    init_tracing(&config.logging);

    let server = Arc::new(ProctoringServer::new(config.proctoring.clone()));
    let rotation = server.start_rotation();

    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        sample_rate = config.proctoring.sample_rate,
        frame_rate = config.proctoring.frame_rate,
        rotation_minutes = config.proctoring.rotation_minutes(),
        min_monitored = config.proctoring.min_monitored,
        max_monitored = config.proctoring.max_monitored,
        "Starting proctoring hub"
    );

    let routes = api::routes(server);
    let (addr, serving) = match warp::serve(routes)
        .try_bind_with_graceful_shutdown(config.bind_address(), shutdown_signal())
    {
        Ok(bound) => bound,
        Err(e) => {
            tracing::error!(error = %e, "Failed to bind listener");
            rotation.abort();
            std::process::exit(1);
        }
    };
    tracing::info!(%addr, "Listening");

    serving.await;
    rotation.abort();
    tracing::info!("Proctoring hub stopped");
}

/// Respects RUST_LOG, falling back to LOG_LEVEL.
fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));

    match logging.format {
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

// Ctrl-C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => tracing::info!("received ctrl-c, shutting down"),
                    _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to register SIGTERM handler");
                ctrl_c.await.ok();
                tracing::info!("received ctrl-c, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        tracing::info!("received ctrl-c, shutting down");
    }
}
