//! falconer - media-acquisition control plane.

use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};

use falconer::config::{self, AppConfig};
use falconer::services::ServiceContainer;
use falconer::{database, logging};

#[derive(Parser)]
#[command(name = "falconer", version, about = "Control plane for external media downloaders")]
struct Cli {
    /// Config file path.
    #[arg(long = "conf", default_value = "./config.yml")]
    conf: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    dotenvy::dotenv().ok();

    let cfg = AppConfig::load(&cli.conf)?;
    let cfg = config::init(cfg);

    let (_observer, _guard) = logging::init(&cfg.logging)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %cfg.server.host,
        port = cfg.server.port,
        queue_size = cfg.server.queue_size,
        "starting falconer"
    );

    let database_file = cfg.database_file();
    let database_url = format!("sqlite:{}", database_file.display());
    info!(database = %database_file.display(), "opening store");

    let pool = database::init_pool(&database_url).await?;
    database::run_migrations(&pool).await?;

    let container = ServiceContainer::new(pool, cfg)?;
    container.initialize().await?;

    info!("falconer started");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received SIGINT, initiating shutdown");
        }
        _ = wait_for_sigterm() => {
            info!("received SIGTERM, initiating shutdown");
        }
    }

    if let Err(e) = container.shutdown().await {
        error!(err = %e, "error during shutdown");
    }

    info!("falconer shutdown complete");
    Ok(())
}

/// Wait for SIGTERM (Unix only).
#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{SignalKind, signal};
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
    sigterm.recv().await;
}

/// On other platforms only Ctrl+C is available.
#[cfg(not(unix))]
async fn wait_for_sigterm() {
    std::future::pending::<()>().await;
}
