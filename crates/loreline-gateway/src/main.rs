use std::sync::Arc;

use clap::Parser;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use loreline_core::config::LorelineConfig;
use loreline_gateway::{build_router, AppState};

#[derive(Parser)]
#[command(name = "loreline-gateway", about = "Grounded-conversation orchestration gateway")]
struct Args {
    /// Path to loreline.toml (defaults to ~/.loreline/loreline.toml).
    #[arg(long)]
    config: Option<String>,

    /// Override the listen port.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut config = LorelineConfig::load(args.config.as_deref())?;
    if let Some(port) = args.port {
        config.gateway.port = port;
    }

    let bind = format!("{}:{}", config.gateway.bind, config.gateway.port);
    let alerts_config = config.alerts.clone();
    let state = Arc::new(AppState::build(config)?);

    // Background workers share one shutdown signal.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let alert_worker = loreline_alerts::AlertWorker::new(
        state.alerts.clone(),
        state.ledger.clone(),
        alerts_config.window.clone(),
        alerts_config.interval_seconds,
        alerts_config.max_tenants_per_tick,
    );
    tokio::spawn(alert_worker.run(shutdown_rx.clone()));

    tokio::spawn(state.indexer.clone().run(300, shutdown_rx.clone()));

    let router = build_router(state.clone());
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!(%bind, "loreline gateway listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    Ok(())
}
