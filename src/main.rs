use clap::Parser;
use csi_sentinel::{
    build_router,
    cli::{Cli, Commands},
    simulator, AppState, ServiceConfig,
};
use std::net::SocketAddr;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "csi_sentinel=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Simulate(args)) => return simulator::run(args).await,
        Some(Commands::Serve) | None => {
            // Continue to run server
        }
    }

    let config = ServiceConfig::from_env()?;

    info!("🚀 Starting CSI Sentinel v{}", VERSION);
    info!("📋 Configuration loaded:");
    info!(
        "   Window: {} samples x {} features (hop {})",
        config.window.window_size, config.window.feature_dim, config.window.hop_size
    );
    info!(
        "   Pipelines: {} workers, queue {}",
        config.pipeline.max_concurrent_pipelines, config.pipeline.queue_capacity
    );
    info!("   Model: {}", config.model_path.display());

    let state = AppState::from_config(&config)?;
    let app = build_router(state);

    let addr: SocketAddr = config.bind_address().parse()?;
    info!("🎧 Listening on {}", addr);
    info!("📡 Monitor endpoint: ws://{}/ws/monitor", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
