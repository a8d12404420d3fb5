use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use clipwire_coordinator::actuator::SubprocessActuator;
use clipwire_coordinator::http_server;
use clipwire_coordinator::relay::{ClickTargets, Coordinator, ScreenPoint};
use clipwire_core::config::RelayConfig;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "coordinator-daemon",
    about = "Clipboard relay coordinator for the clipwire suite"
)]
struct Args {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Actuator command line, e.g. --actuator java --actuator -jar --actuator agent.jar
    #[arg(long = "actuator")]
    actuator_command: Vec<String>,

    /// HTTP server address
    #[arg(long)]
    http_addr: Option<SocketAddr>,

    /// Preset single click target, e.g. --click-target 500,400
    #[arg(long, value_parser = parse_point)]
    click_target: Option<ScreenPoint>,

    /// Overall per-request timeout in milliseconds
    #[arg(long)]
    request_timeout_ms: Option<u64>,
}

fn parse_point(raw: &str) -> Result<ScreenPoint, String> {
    let (x, y) = raw
        .split_once(',')
        .ok_or_else(|| format!("expected x,y but got {raw:?}"))?;
    Ok(ScreenPoint {
        x: x.trim().parse().map_err(|e| format!("bad x: {e}"))?,
        y: y.trim().parse().map_err(|e| format!("bad y: {e}"))?,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    info!("Starting clipwire coordinator daemon");

    let args = Args::parse();

    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => clipwire_core::config::default_config_file()?,
    };
    let mut config = match RelayConfig::load_from_file(&config_path) {
        Ok(cfg) => {
            info!("Loaded configuration from {}", config_path.display());
            cfg
        }
        Err(e) => {
            error!("Failed to load configuration from {}: {}", config_path.display(), e);
            return Err(anyhow::anyhow!("Configuration error: {}", e));
        }
    };

    // Update config from CLI args
    if !args.actuator_command.is_empty() {
        config.coordinator.actuator_command = args.actuator_command.clone();
    }
    if let Some(addr) = args.http_addr {
        config.coordinator.http_addr = addr.to_string();
    }
    if let Some(timeout) = args.request_timeout_ms {
        config.coordinator.request_timeout_ms = timeout;
    }

    let http_addr: SocketAddr = config
        .coordinator
        .http_addr
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid HTTP address {}: {}", config.coordinator.http_addr, e))?;

    // Spawn the actuator subprocess and check it answers.
    let actuator = SubprocessActuator::spawn(config.coordinator.actuator_command.clone())?;
    let coordinator = Arc::new(Coordinator::new(config.coordinator.clone(), Arc::new(actuator)));

    match coordinator.ping_actuator().await {
        Ok(()) => info!("Actuator is responsive"),
        Err(e) => {
            error!(error = %e, "Actuator did not answer the initial ping");
            return Err(anyhow::anyhow!("Failed to reach the actuator: {}", e));
        }
    }

    if let Some(point) = args.click_target {
        coordinator
            .calibrate(ClickTargets::Single(point))
            .await;
    } else {
        info!(
            "No click target preset; calibrate at http://{}/api/calibrate?x=X&y=Y",
            http_addr
        );
    }

    // Let the agent's tray icon show we are up.
    if let Err(e) = coordinator.set_status("clipwire ready").await {
        error!(error = %e, "failed to set actuator status");
    }

    http_server::run_server(coordinator, http_addr).await
}
