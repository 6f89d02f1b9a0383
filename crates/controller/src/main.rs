//! Controller service entry point

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use controller::api::AdminApi;
use controller::config::{Config, StorageEngine};
use controller::Controller;
use persist::{MemoryPersist, Persist, RocksPersist};

/// Control plane for slot-sharded KV data nodes
#[derive(Parser, Debug)]
#[command(name = "controller")]
#[command(about = "Topology controller for slot-sharded KV clusters")]
struct Args {
    /// Config yaml file path
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    // Initialize logging
    let level = match config.log.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting controller...");
    info!("  Identity: {}", config.addr);
    info!("  Admin API: {}", config.admin.addr);

    let persist: Arc<dyn Persist> = match config.storage.engine {
        StorageEngine::Memory => Arc::new(MemoryPersist::new()),
        StorageEngine::Rocksdb => Arc::new(RocksPersist::open(&config.storage.data_dir)?),
    };

    let ctl = Arc::new(Controller::new(config.clone(), persist));
    ctl.start();

    // Admin API with graceful shutdown on ctrl-c
    let admin = AdminApi::new(ctl.store());
    let app = admin.router();
    let listener = tokio::net::TcpListener::bind(&config.admin.addr).await?;
    info!("Admin API listening on {}", config.admin.addr);

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
    };
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    ctl.stop().await;
    info!("controller exited");
    Ok(())
}
