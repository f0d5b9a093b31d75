use std::error::Error;
use std::sync::Arc;

use roomcast::{
    server::{router, shutdown_signal},
    AppState, Broker, Config, ConnectionRegistry, InMemoryBroker, InMemoryConnectionRegistry,
    RedisBroker, RoomLifecycle, RoomLifecycleManager,
};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Optional .env for local runs
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "roomcast=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().inspect_err(|e| {
        error!(error = %e, "Invalid configuration");
    })?;

    info!(bind_addr = %config.bind_addr, "Starting room broadcast server");

    // Redis when configured, otherwise a process-local broker
    let broker: Arc<dyn Broker> = match &config.broker_url {
        Some(url) => Arc::new(RedisBroker::connect(url).await.inspect_err(|e| {
            error!(error = %e, "Failed to connect to broker");
        })?),
        None => {
            info!("BROKER_URL not set - using in-memory broker");
            Arc::new(InMemoryBroker::new())
        }
    };

    let connection_registry: Arc<dyn ConnectionRegistry> =
        Arc::new(InMemoryConnectionRegistry::new());
    let room_lifecycle = Arc::new(RoomLifecycleManager::new(
        Arc::clone(&broker),
        Arc::clone(&connection_registry),
        config.start_timeout,
        config.stop_timeout,
    ));

    let app_state = AppState::new(
        broker,
        connection_registry,
        room_lifecycle.clone(),
        config.connection,
    );
    let shutdown = app_state.shutdown.clone();

    let app = router(app_state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!(bind_addr = %config.bind_addr, "Server running");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    // Connections have drained; stop anything still subscribed
    room_lifecycle.shutdown().await;
    info!("Server stopped");

    Ok(())
}
