// livewatch - live-stream interaction monitor
//
// Watches a set of streamer identities, connects to each one while it is live
// and records every audience interaction (chat, gifts, likes, shares,
// memberships) plus per-stream sessions into SQLite.
//
// Architecture:
// - Controller: polls the `job_control` run signal, starts/stops the monitor
// - Reconciler: re-reads active identities, spawns/retires supervisors
// - Supervisor (one per identity): live check → connect → event loop → cooldown
// - SessionTracker: opens/closes stream sessions and keeps their counters
// - PersistenceGateway: bounded, busy-retrying access to SQLite

mod cli;
mod clock;
mod config;
mod controller;
mod events;
mod logging;
mod platform;
mod registry;
mod sessions;
mod startup;
mod store;
mod supervisor;
mod util;

use anyhow::{Context, Result};
use clap::Parser;
use clock::Clock;
use config::Config;
use controller::{Controller, MonitorService};
use platform::demo::DemoConnector;
use platform::PlatformConnector;
use sessions::SessionTracker;
use std::sync::Arc;
use store::PersistenceGateway;
use supervisor::{SupervisorContext, SupervisorSettings};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();

    // Handle subcommands (config, identity, job, init-db)
    if cli::handle_cli(&cli).await? {
        return Ok(());
    }

    // Ensure config template exists (helps users discover options)
    Config::ensure_config_exists();

    let config = Config::from_env();

    // The guard must be kept alive for the duration of the program to ensure logs flush
    let _file_guard = logging::init(&config.logging)?;

    let connector: Arc<dyn PlatformConnector> =
        Arc::new(DemoConnector::new(config.demo.clone()));

    startup::print_startup(&config, connector.name());
    startup::log_startup(&config, connector.name());

    let store = PersistenceGateway::open(&config.storage)
        .with_context(|| format!("opening {}", config.storage.db_path.display()))?;

    let clock = Clock::system();
    let ctx = SupervisorContext {
        store: store.clone(),
        tracker: SessionTracker::new(store.clone(), clock),
        clock,
        settings: SupervisorSettings::from(&config.supervisor),
    };

    let monitor = MonitorService::new(
        connector,
        Arc::new(store.clone()),
        ctx,
        config.registry.refresh_interval(),
    );
    let controller = Controller::new(Arc::new(store), monitor, config.control.poll_interval());

    controller
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
            tracing::info!("Ctrl-C received, shutting down");
        })
        .await;

    tracing::info!("Shutdown complete");
    Ok(())
}
