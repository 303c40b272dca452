use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Router};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use gateway::{ws, Config, ConnectionRegistry, GatewayState};
use orchestrator::{HttpAgentConnector, TaskProcessor};
use shared_types::auth::JwksGate;
use shared_types::AuthGate;
use streamstore::Store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gateway=debug,orchestrator=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let queue_config = orchestrator::Config::from_env()?;
    info!(port = config.port, topic = %queue_config.topic, "gateway starting");

    let store = Store::new();
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(120))
        .build()?;
    let gate: Arc<dyn AuthGate> = Arc::new(JwksGate::new(http.clone(), &queue_config.jwks_url));
    let connector = Arc::new(HttpAgentConnector::new(
        http,
        &queue_config.agent_base_url,
    ));

    // Task processor, colocated with the gateway.
    let processor = TaskProcessor::new(
        store.clone(),
        Arc::clone(&gate),
        connector,
        queue_config.processor_settings(),
    );
    let processor_handle = orchestrator::lifecycle::start(processor);

    // Fan-out bridge for this process's connections.
    let registry = Arc::new(ConnectionRegistry::new());
    let bridge_handle = gateway::lifecycle::start(
        store.clone(),
        &queue_config.chat_channel,
        Arc::clone(&registry),
    );

    let state = Arc::new(GatewayState {
        store,
        registry,
        gate,
        task_topic: queue_config.topic.clone(),
        chat_channel: queue_config.chat_channel.clone(),
    });

    let app = Router::new()
        .route("/ws/chat", get(ws::chat_ws))
        .route("/health", get(|| async { "ok" }))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("0.0.0.0:{}", config.port);
    info!("listening on {addr}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Processor first: closing the store ends the bridge's channel too.
    processor_handle.stop().await;
    bridge_handle.stop().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
    info!("shutdown signal received");
}
