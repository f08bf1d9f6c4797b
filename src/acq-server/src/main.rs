// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

mod config;
mod listener;

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use acq_app::{init_logging, normalize_name};
use acq_backend::{register_builtin_backends_on, RegistrationContext};
use acq_core::{AcquisitionController, AcquisitionTaskConfig, DynResult};

use config::ServerConfig;

const PKG_DESCRIPTION: &str = concat!(env!("CARGO_PKG_NAME"), " - acquisition control daemon");

#[derive(Debug, Parser)]
#[command(
    author = env!("CARGO_PKG_AUTHORS"),
    version = env!("CARGO_PKG_VERSION"),
    about = PKG_DESCRIPTION,
)]
struct Cli {
    /// Path to configuration file
    #[arg(long = "config", short = 'C', value_name = "FILE")]
    config: Option<PathBuf>,
    /// Print example configuration and exit
    #[arg(long = "print-config")]
    print_config: bool,
    /// Device identity embedded in run ids
    #[arg(short = 'd', long = "device-id")]
    device_id: Option<String>,
    /// Acquisition backend to use (e.g. simulated)
    #[arg(short = 'b', long = "backend")]
    backend: Option<String>,
    /// IP address for the JSON TCP listener
    #[arg(short = 'l', long = "listen")]
    listen: Option<IpAddr>,
    /// Port for the JSON TCP listener
    #[arg(short = 'p', long = "port")]
    port: Option<u16>,
}

/// Apply command-line overrides on top of the loaded configuration.
fn apply_cli(cli: &Cli, cfg: &mut ServerConfig) {
    if let Some(ref device_id) = cli.device_id {
        cfg.general.device_id = device_id.clone();
    }
    if let Some(ref backend) = cli.backend {
        cfg.device.backend = backend.clone();
    }
    if let Some(listen) = cli.listen {
        cfg.listen.listen = listen;
    }
    if let Some(port) = cli.port {
        cfg.listen.port = port;
    }
}

fn build_task_config(
    cfg: &ServerConfig,
    registry: &RegistrationContext,
) -> DynResult<AcquisitionTaskConfig> {
    let backend_name = normalize_name(&cfg.device.backend);
    if !registry.is_backend_registered(&backend_name) {
        return Err(format!(
            "Unknown backend '{}' (available: {})",
            cfg.device.backend,
            registry.registered_backends().join(", ")
        )
        .into());
    }

    let backend = registry.build_backend(&backend_name, &cfg.backend_settings())?;
    let mut task_config = AcquisitionTaskConfig::new(backend.device, backend.pipeline);
    task_config.readiness_timeout = cfg.behavior.readiness_timeout();
    task_config.recovery_timeout = cfg.behavior.recovery_timeout();
    task_config.default_stop_action = cfg.behavior.stop_action()?;
    task_config.subscriber_queue_depth = cfg.behavior.subscriber_queue_depth;
    task_config.request_channel_buffer = cfg.behavior.request_channel_buffer;
    Ok(task_config)
}

#[tokio::main]
async fn main() -> DynResult<()> {
    let mut bootstrap_ctx = RegistrationContext::new();
    register_builtin_backends_on(&mut bootstrap_ctx);

    let cli = Cli::parse();

    if cli.print_config {
        println!("{}", ServerConfig::example_toml());
        return Ok(());
    }

    let (mut cfg, config_path) = if let Some(ref path) = cli.config {
        let cfg = ServerConfig::load_from_file(path)?;
        (cfg, Some(path.clone()))
    } else {
        ServerConfig::load_from_default_paths()?
    };
    apply_cli(&cli, &mut cfg);
    cfg.validate()
        .map_err(|e| format!("Invalid server configuration: {}", e))?;

    init_logging(cfg.general.log_level.as_deref());

    if let Some(ref path) = config_path {
        info!("Loaded configuration from {}", path.display());
    }

    let task_config = build_task_config(&cfg, &bootstrap_ctx)?;
    info!(
        "Starting acq-server (device: {}, backend: {})",
        cfg.general.device_id, cfg.device.backend
    );

    let mut task_handles: Vec<JoinHandle<()>> = Vec::new();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let (controller, acquisition_handle) = AcquisitionController::spawn(task_config);
    task_handles.push(acquisition_handle);

    if cfg.listen.enabled {
        let listen_addr = SocketAddr::from((cfg.listen.listen, cfg.listen.port));
        let auth_tokens = cfg.listen.auth.tokens.clone();
        let listener_controller = controller.clone();
        let listener_shutdown_rx = shutdown_rx.clone();
        task_handles.push(tokio::spawn(async move {
            if let Err(e) = listener::run_listener(
                listen_addr,
                listener_controller,
                auth_tokens,
                listener_shutdown_rx,
            )
            .await
            {
                error!("Listener error: {:?}", e);
            }
        }));
    }

    signal::ctrl_c().await?;
    info!("Ctrl+C received, shutting down");
    let _ = shutdown_tx.send(true);
    drop(controller);
    tokio::time::sleep(Duration::from_millis(400)).await;

    for handle in &task_handles {
        if !handle.is_finished() {
            handle.abort();
        }
    }
    for handle in task_handles {
        let _ = handle.await;
    }
    Ok(())
}
