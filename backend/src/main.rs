// Courier Server entrypoint
//!
//! Initialization, wiring and graceful shutdown live in dedicated modules so
//! this file remains a thin orchestrator.

use anyhow::Result;
use courier_configs::{JobSwitches, LiveConfig};
use courier_server::lifecycle::{bootstrap, run};
use courier_server::logging;
use log::info;
use std::env;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    // First positional argument overrides the config location
    let config_path = env::args().nth(1).unwrap_or_else(|| "config.toml".to_string());

    // The live view keeps per-run job switches in sync with the file
    let live = match LiveConfig::load(&config_path) {
        Ok(live) => {
            eprintln!(
                "✅ Loaded config from: {}",
                std::fs::canonicalize(&config_path)
                    .unwrap_or_else(|_| std::path::PathBuf::from(&config_path))
                    .display()
            );
            Arc::new(live)
        },
        Err(e) => {
            eprintln!("❌ FATAL: Failed to load {}: {}", config_path, e);
            eprintln!("❌ Server cannot start without valid configuration");
            std::process::exit(1);
        },
    };
    let config = live.current();

    // Logging before any other side effects
    let server_log_path = format!("{}/server.log", config.logging.logs_path);
    logging::init_logging(
        &config.logging.level,
        &server_log_path,
        config.logging.log_to_console,
        Some(&config.logging.targets),
        &config.logging.format,
    )?;

    info!("╔═══════════════════════════════════════════════════════════════╗");
    info!("║           Courier Server v{:<36} ║", env!("CARGO_PKG_VERSION"));
    info!("╚═══════════════════════════════════════════════════════════════╝");
    info!(
        "Instance: {}  Locks: {:?}  Store: {}",
        config.server.instance_id, config.locks.backend, config.store.sqlite_path
    );

    let switches: Arc<dyn JobSwitches> = live;
    let components = bootstrap(&config, switches).await?;

    run(&config, components).await
}
