//! paygate CLI entry point.

mod cli;

use clap::Parser;
use cli::Cli;
use paygate::event::create_event_channel;
use paygate::http::{run_server, AppState};
use paygate::sweep::spawn_sweeper;
use paygate::GatewayEvent;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    // Initialize error handling
    color_eyre::install()?;

    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize tracing
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    info!("paygate v{}", env!("CARGO_PKG_VERSION"));

    // Build configuration
    let config = cli.into_config()?;
    config.validate()?;

    // Shutdown and event channels
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (events_tx, mut events_rx) = create_event_channel();

    // Assemble the gateway with in-memory stores
    let state = AppState::from_config(&config, events_tx.clone())?;

    // Background expiry sweep
    let sweeper = spawn_sweeper(
        Arc::clone(state.limiter()),
        Arc::clone(state.passes()),
        Duration::from_secs(config.sweep_interval_secs),
        shutdown_rx.clone(),
    );

    // Surface gateway events in the logs
    tokio::spawn(async move {
        while let Ok(event) = events_rx.recv().await {
            debug!("gateway event: {event:?}");
        }
    });

    let _ = events_tx.send(GatewayEvent::Started);

    // Ctrl-C triggers graceful shutdown
    let shutdown_trigger = shutdown_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, initiating shutdown");
            let _ = shutdown_trigger.send(true);
        }
    });

    // Serve until shutdown
    run_server(&config, state, shutdown_rx).await?;

    let _ = events_tx.send(GatewayEvent::ShuttingDown);
    let _ = shutdown_tx.send(true);
    sweeper.await.ok();

    info!("Goodbye!");
    Ok(())
}
