use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use reef_server::config::ServerConfig;
use reef_server::metrics::{self, Metrics};
use reef_server::net::transport::WebSocketServer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // RUST_LOG overrides the default level
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!("Reef Server v{}", env!("CARGO_PKG_VERSION"));

    let config = ServerConfig::load_or_default();
    config.validate().map_err(anyhow::Error::msg)?;
    info!(
        "Configuration loaded: {}:{}, chat={}, max_players={}, tick_rate={}Hz",
        config.bind_address,
        config.port,
        config
            .chat_port
            .map(|p| p.to_string())
            .unwrap_or_else(|| "game port".to_string()),
        config.max_players,
        config.tick_rate
    );

    let metrics = Arc::new(Metrics::new());

    if config.metrics_port != 0 {
        let metrics_clone = metrics.clone();
        let (bind_address, metrics_port) = (config.bind_address, config.metrics_port);
        tokio::spawn(async move {
            if let Err(e) = metrics::start_metrics_server(metrics_clone, bind_address, metrics_port).await {
                error!("Metrics server error: {}", e);
            }
        });
    }

    let server = WebSocketServer::bind(&config, metrics.clone()).await?;

    // Shutdown signal handler
    let shutdown = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
        info!("Shutdown signal received");
    };

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server error: {}", e);
            }
        }
        _ = shutdown => {
            info!("Shutting down...");
        }
    }

    info!("Server stopped");
    Ok(())
}
