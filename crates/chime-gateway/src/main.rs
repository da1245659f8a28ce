//! `chime-gateway`: HTTP front end and scheduler loop in one process.
//!
//! Usage:
//!   chime-gateway [--config <path>]
//!
//! Without `--config` (or `CHIME_CONFIG`) the file `~/.chime/chime.toml` is
//! read when present; every setting has a default.

use std::net::SocketAddr;
use std::sync::Arc;

use chime_core::config::ChimeConfig;
use chime_scheduler::{
    Dispatcher, Executor, HttpTransport, SchedulerEngine, SchedulerService, SqliteTaskStore,
};
use clap::Parser;
use tracing::{info, warn};

mod app;
mod http;

/// Minute-resolution HTTP callback scheduler.
#[derive(Parser, Debug)]
#[command(name = "chime-gateway", about = "Minute-resolution HTTP callback scheduler")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(short = 'c', long = "config", env = "CHIME_CONFIG")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // config decides the default log level, so load it before logging starts
    let loaded = ChimeConfig::load(cli.config.as_deref());
    let debug = loaded.as_ref().map(|c| c.debug).unwrap_or(false);
    let default_filter = if debug {
        "chime_gateway=debug,chime_scheduler=debug,tower_http=debug"
    } else {
        "chime_gateway=info,chime_scheduler=info,tower_http=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    let config = loaded.unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        ChimeConfig::default()
    });

    config.database.ensure_parent_dir()?;
    let db_path = &config.database.path;
    info!(path = %db_path, "opening SQLite database");

    // API and scheduler each get their own connection
    let api_store = Arc::new(SqliteTaskStore::open(db_path)?);
    let engine_store = Arc::new(SqliteTaskStore::open(db_path)?);

    let transport = Arc::new(HttpTransport::new(&config.callback)?);
    let executor = Executor::new(engine_store.clone(), transport);
    let dispatcher = Dispatcher::spawn(
        executor,
        config.scheduler.workers,
        config.scheduler.queue_capacity,
    );
    let engine = SchedulerEngine::new(engine_store, dispatcher, config.scheduler.clone());

    let service = SchedulerService::new(api_store, config.scheduler.page_size);
    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;

    let state = Arc::new(app::AppState::new(config, service));
    let router = app::build_router(state);

    // spawn scheduler engine loop in background
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let engine_task = tokio::spawn(engine.run(shutdown_rx));

    info!("Chime gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // signal scheduler to stop
    let _ = shutdown_tx.send(true);
    if let Err(e) = engine_task.await {
        warn!("scheduler engine task ended abnormally: {e}");
    }
    info!("Chime gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
