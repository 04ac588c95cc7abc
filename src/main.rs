//! ==============================================================================
//! main.rs - brewdash entry point
//! ==============================================================================
//!
//! responsibilities:
//!     - load configuration (first argument, or config/brewdash.toml)
//!     - install the tracing subscriber
//!     - resolve the rig directory and start one task per rig
//!     - serve the json view api until ctrl-c
//!
//! ==============================================================================

use anyhow::Result;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use brewdash::{api, Dashboard, DashConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // startup banner
    println!("===========================================================");
    println!("  brewdash - fermentation controller dashboard");
    println!("===========================================================");

    // step 1: load configuration
    let config = DashConfig::load_or_default(std::env::args().nth(1).map(PathBuf::from));
    config.print_summary();

    // step 2: logging (RUST_LOG overrides the configured level)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // step 3: directory, rig tasks, system channel
    let dashboard = Dashboard::start(&config).await?;

    // step 4: api server in background
    let bind = config.api.bind.clone();
    let server = tokio::spawn(async move {
        info!(bind = %bind, "api listening");
        if let Err(e) = api::run_server(dashboard, &bind).await {
            error!(error = %e, "api server error");
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    server.abort();
    Ok(())
}
