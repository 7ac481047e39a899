use anycubic_bridge::cloud::StaticCloudClient;
use anycubic_bridge::config::{self, BridgeConfig};
use anycubic_bridge::coordinator::Coordinator;
use anycubic_bridge::mqtt::RumqttcConnector;
use anycubic_bridge::printer::PrinterState;
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, info_span, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let path = match std::env::args().nth(1) {
        Some(path) => PathBuf::from(path),
        None => config::default_config_path()?,
    };

    if config::ensure_default_config(&path).await? {
        setup_logging_env(Level::INFO);
        warn!(
            "Created {}. Fill in credentials and printer ids, then start again",
            path.display()
        );
        return Ok(());
    }

    let config = config::load(&path).await?;
    setup_logging_env(if config.debug { Level::DEBUG } else { Level::INFO });
    info!("Loaded config from {}", path.display());

    let mut coordinator = start_coordinator(config).await?;

    for printer_id in coordinator.printer_ids() {
        if let Some(updates) = coordinator.subscribe(printer_id) {
            tokio::spawn(log_state_changes(updates));
        }
    }

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| eyre!("Failed to listen for Ctrl-C: {}", e))?;
    info!("Shutting down");
    coordinator.shutdown().await;

    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    Ok(())
}

fn setup_logging_env(level: Level) {
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}

async fn start_coordinator(config: BridgeConfig) -> Result<Coordinator> {
    let cloud = StaticCloudClient::new(config.mqtt_credentials(), config.printer_identities());
    Coordinator::start(
        config,
        Arc::new(cloud),
        Arc::new(RumqttcConnector),
        info_span!("bridge"),
    )
    .await
    .map_err(|e| eyre!("Failed to start bridge: {}", e))
}

async fn log_state_changes(mut updates: watch::Receiver<PrinterState>) {
    while updates.changed().await.is_ok() {
        let state = updates.borrow_and_update().clone();
        info!(
            "{} ({}): online={:?} job={:?} {}% nozzle={:?} bed={:?} drying={}",
            state.name.as_deref().unwrap_or("printer"),
            state.printer_id,
            state.online,
            state.job.status,
            state.job.progress_pct,
            state.temperatures.nozzle,
            state.temperatures.hotbed,
            state.is_drying()
        );
    }
}
