//! apiwatch - HTTP API uptime monitor
//!
//! Polls registered endpoints, keeps a check history and a per-endpoint
//! status snapshot, and alerts subscribers when an endpoint goes down or
//! recovers.

mod config;
mod db;
mod notify;
mod probe;
mod scheduler;
#[cfg(test)]
mod testing;
mod web;

use clap::{Parser, Subcommand};
use config::ServerConfig;
use db::Store;
use notify::{Delivery, LogDelivery, Notifier, TelegramDelivery};
use probe::HttpProber;
use scheduler::Scheduler;
use web::Server;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Parser)]
#[command(name = "apiwatch", version, about = "Monitor HTTP APIs and alert on outages")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the monitoring loop only
    Run,
    /// Serve the HTTP API only
    Serve,
    /// Run the monitoring loop and the HTTP API (default)
    Both,
    /// Register one endpoint
    Add { name: String, url: String },
    /// Register endpoints from a NAME,URL list
    Import { path: PathBuf },
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("apiwatch=info".parse()?))
        .init();

    let cli = Cli::parse();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Using database at {}", cfg.db_path);

    // Initialize database
    let store = Arc::new(Store::new(&cfg.db_path)?);
    tracing::info!("Database initialized successfully");

    match cli.command.unwrap_or(Command::Both) {
        Command::Add { name, url } => {
            let endpoint = store.add_endpoint(&name, &url)?;
            tracing::info!("Registered {} ({}) as #{}", endpoint.name, endpoint.url, endpoint.id);
            Ok(())
        }
        Command::Import { path } => import(&store, &path),
        Command::Run => {
            let shutdown = shutdown_on_ctrl_c();
            build_scheduler(&cfg, store)?.run(shutdown).await;
            Ok(())
        }
        Command::Serve => {
            let shutdown = shutdown_on_ctrl_c();
            Server::new(cfg, store).start(shutdown).await
        }
        Command::Both => {
            let scheduler = build_scheduler(&cfg, store.clone())?;
            let server = Server::new(cfg, store);
            // Bind before monitoring starts so a taken port stops the process
            let listener = server.bind().await?;

            let shutdown = shutdown_on_ctrl_c();
            let (_, served) = tokio::join!(
                scheduler.run(shutdown.clone()),
                server.serve(listener, shutdown)
            );
            served
        }
    }
}

fn build_scheduler(cfg: &ServerConfig, store: Arc<Store>) -> Result<Scheduler, BoxError> {
    let prober = Arc::new(HttpProber::new(cfg.probe_config())?);

    let delivery: Arc<dyn Delivery> = match &cfg.telegram_bot_token {
        Some(token) => Arc::new(TelegramDelivery::new(token.clone())),
        None => {
            tracing::warn!("TELEGRAM_BOT_TOKEN not set, alerts will only be logged");
            Arc::new(LogDelivery)
        }
    };
    let notifier = Notifier::new(delivery, cfg.delivery_concurrency);

    Ok(Scheduler::new(
        store.clone(),
        store.clone(),
        store,
        prober,
        notifier,
        cfg.scheduler_config(),
    ))
}

fn import(store: &Store, path: &Path) -> Result<(), BoxError> {
    let text = std::fs::read_to_string(path)?;
    let endpoints = db::parse_endpoint_list(&text)?;

    for new in &endpoints {
        let endpoint = store.add_endpoint(&new.name, &new.url)?;
        tracing::debug!("Imported {} as #{}", endpoint.url, endpoint.id);
    }

    tracing::info!("Imported {} endpoints from {}", endpoints.len(), path.display());
    Ok(())
}

/// Flip the returned receiver to `true` on Ctrl-C.
fn shutdown_on_ctrl_c() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Shutdown requested");
                let _ = tx.send(true);
            }
            Err(e) => {
                tracing::error!("Failed to listen for Ctrl-C: {}", e);
                // Dropping the sender would stop everything
                std::future::pending::<()>().await;
            }
        }
    });
    rx
}
