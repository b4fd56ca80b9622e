use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use dotenv::dotenv;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{self, TraceLayer};
use tracing::{info, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod router;

use device_telemetry_cell::TelemetryState;
use shared_config::AppConfig;
use telehealth_cell::{TelehealthState, WaitingRoomMonitor};

const MONITOR_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Loading Env Vars
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting telehealth API server");

    let config = Arc::new(AppConfig::from_env());
    info!(
        "Session store backend: {}",
        config.telehealth.session_store_backend.as_str()
    );

    let telehealth = TelehealthState::from_config(config.clone());
    let telemetry = TelemetryState::from_config(config.clone());

    // Abandonment sweep and wait-time refresh
    let monitor = Arc::new(WaitingRoomMonitor::new(
        telehealth.service.waiting_room().clone(),
        &config.telehealth,
    ));
    let monitor_task = {
        let monitor = monitor.clone();
        tokio::spawn(async move { monitor.run().await })
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = router::create_router(telehealth, telemetry)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(trace::DefaultMakeSpan::new().level(Level::INFO))
                .on_response(trace::DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Listening on {}", addr);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    monitor.shutdown().await;
    match tokio::time::timeout(MONITOR_SHUTDOWN_GRACE, monitor_task).await {
        Ok(joined) => joined.context("waiting room monitor panicked")?,
        Err(_) => tracing::warn!("Waiting room monitor did not stop within {:?}", MONITOR_SHUTDOWN_GRACE),
    }
    info!("Server stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
