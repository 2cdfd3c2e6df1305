// Copyright (C) 2025 Joseph Sacchini
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU Affero General Public License as published by the Free
// Software Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License for more
// details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::{Mutex, watch};
use tracing::{error, info};
use wirekeep_core::cron::CronManager;
use wirekeep_core::{SystemShell, WireguardManager, config};

const TRAFFIC_SAVE_INTERVAL: Duration = Duration::from_secs(60 * 60);

fn init_tracing(default_level: &str) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    #[cfg(distribute)]
    {
        fmt().json().with_env_filter(filter).init();
    }

    #[cfg(not(distribute))]
    {
        fmt().pretty().with_env_filter(filter).init();
    }
}

#[derive(Debug, Parser)]
#[command(name = env!("CARGO_PKG_NAME"))]
#[command(version = env!("GIT_VERSION"))]
#[command(about = "WireGuard interface and peer manager")]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "/etc/wirekeep/wirekeep.toml")]
    config: PathBuf,

    /// Do not bring up `auto` interfaces on startup
    #[arg(long)]
    no_autostart: bool,
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
                return;
            }
            Err(e) => error!(error = %e, "unable to listen for SIGTERM"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "unable to listen for ctrl-c");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let mut config = config::load(&args.config).await?;
    init_tracing(&config.logger.level);
    info!(config = %args.config.display(), "starting wirekeep");

    config.wireguard.resolve_missing(&SystemShell).await;
    let manager = WireguardManager::from_config(SystemShell, config, &args.config).await?;
    if !args.no_autostart {
        manager.start().await;
    }
    let manager = Arc::new(Mutex::new(manager));

    let mut cron = CronManager::new();
    let job_manager = manager.clone();
    cron.every("save-traffic", TRAFFIC_SAVE_INTERVAL, move || {
        let manager = job_manager.clone();
        async move {
            if let Err(e) = manager.lock().await.save_traffic().await {
                error!(error = %e, "failed to save traffic data");
            }
        }
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = tokio::spawn(cron.run(shutdown_rx));

    shutdown_signal().await;
    info!("shutting down");

    shutdown_tx.send(true).ok();
    if let Err(e) = scheduler.await {
        error!(error = %e, "scheduler task failed");
    }
    manager.lock().await.stop().await;
    Ok(())
}
