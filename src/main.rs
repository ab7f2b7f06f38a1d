//! Motion Alert Relay
//!
//! Main entry point: wires the alert pipeline to the dashboard API.

use motion_alert_relay::{
    control_client::HttpControlClient,
    motion_alert::{MotionAlertService, WebSocketTransport},
    realtime_hub::{forward_pipeline_events, RealtimeHub},
    state::{AppConfig, AppState},
    web_api,
};
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "motion_alert_relay=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Motion Alert Relay v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::from_env()?;
    tracing::info!(
        motion_api_url = %config.motion_api_url,
        motion_events_url = %config.motion_events_url,
        cooldown_ms = config.alert_cooldown_ms,
        history_capacity = config.alert_history_capacity,
        devices = ?config.devices,
        "Configuration loaded"
    );

    let realtime = Arc::new(RealtimeHub::new());

    let control = Arc::new(HttpControlClient::new(
        &config.motion_api_url,
        config.control_timeout(),
    )?);
    let transport = Arc::new(WebSocketTransport::new(config.motion_events_url.clone()));

    let motion = MotionAlertService::builder(transport, control)
        .with_settings(config.motion_settings())
        .build();
    tracing::info!("MotionAlertService initialized");

    // Dashboard notifications all come from the ordered pipeline stream
    tokio::spawn(forward_pipeline_events(
        realtime.clone(),
        motion.subscribe_events(),
    ));

    for device_id in &config.devices {
        motion.subscribe(device_id).await;
    }
    motion.connect();

    let state = AppState {
        config: config.clone(),
        motion: motion.clone(),
        realtime,
        started_at: Instant::now(),
    };

    let app = web_api::create_router(state)
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    motion.shutdown().await;
    tracing::info!("Motion Alert Relay stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
