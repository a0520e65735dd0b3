mod config;
mod ecs;
mod interact;
mod listeners;
mod network;
mod tick;

use config::ServerConfig;
use dashmap::DashMap;
use interact::StackedLines;
use listeners::Scheduler;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{error, info};
use wiretap::{default_bindings, VersionDescriptor, Wiretap};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Starting Wiretap server...");

    let config = Arc::new(ServerConfig::load(Path::new("config/server.toml"))?);
    info!(
        "Config loaded: bind={}:{}, max_players={}, targets={}",
        config.bind,
        config.port,
        config.max_players,
        config.interact_targets.len()
    );

    // The release is fixed for the life of the process
    let version = match &config.server_version {
        Some(raw) => VersionDescriptor::parse(raw)?,
        None => VersionDescriptor::detect()?,
    };
    let wiretap = Arc::new(Wiretap::initialize(version, default_bindings())?);

    let locations: tick::LocationCache = Arc::new(DashMap::new());
    let (scheduler, sync_queue) = Scheduler::new(Handle::current());
    listeners::install(
        wiretap.dispatcher(),
        &config,
        &scheduler,
        &locations,
        Arc::new(StackedLines::new(config.click_line_step)),
    );

    // Channel: connection tasks -> tick loop
    let (tick_tx, tick_rx) = mpsc::unbounded_channel::<tick::TickMessage>();

    // Player count for status responses
    let player_count = Arc::new(AtomicUsize::new(0));

    // TCP listener
    let addr = format!("{}:{}", config.bind, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    // Graceful shutdown channel
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received shutdown signal");
        let _ = shutdown_tx.send(true);
    });

    let ctx = tick::TickContext::new(Arc::clone(&wiretap), locations);

    tokio::select! {
        _ = tick::run_tick_loop(config.clone(), ctx, tick_rx, sync_queue, player_count.clone(), shutdown_rx) => {
            info!("Server shut down cleanly");
        }
        _ = accept_loop(listener, config, wiretap, tick_tx, player_count) => {
            error!("Accept loop exited unexpectedly");
        }
    }

    Ok(())
}

async fn accept_loop(
    listener: TcpListener,
    config: Arc<ServerConfig>,
    wiretap: Arc<Wiretap>,
    tick_tx: mpsc::UnboundedSender<tick::TickMessage>,
    player_count: Arc<AtomicUsize>,
) {
    loop {
        match listener.accept().await {
            Ok((socket, peer)) => {
                info!("New connection from {}", peer);
                let config = config.clone();
                let wiretap = wiretap.clone();
                let tx = tick_tx.clone();
                let pc = player_count.clone();
                tokio::spawn(async move {
                    network::handle_connection(socket, config, wiretap, tx, move || {
                        pc.load(Ordering::Relaxed)
                    })
                    .await;
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}
