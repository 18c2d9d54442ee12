//! Application entry point.

use std::sync::Arc;

use anyhow::{Context, Result};
use dotenvy::dotenv;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use reward_harvester::app::{Harvester, spawn_harvester};
use reward_harvester::config::{AccountSourceKind, AppConfig, LogFormat};
use reward_harvester::domain::{Account, AccountSource, AppError};
use reward_harvester::infra::{FileAccountSource, HttpRewardsClient, PromptAccountSource};

fn init_tracing(format: LogFormat) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,reqwest=warn"));

    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

/// Build the RPC client and load every account before any flow starts
async fn bootstrap(config: &AppConfig) -> Result<(HttpRewardsClient, Vec<Account>), AppError> {
    let client = HttpRewardsClient::new(config.rpc.clone())?;
    info!(
        "   ✓ RPC client created ({}, dialect: {}, mining event: {})",
        config.rpc.rpc_url, config.rpc.dialect, config.rpc.mining_event_id
    );

    let source: Box<dyn AccountSource> = match config.account_source {
        AccountSourceKind::Prompt => Box::new(PromptAccountSource::stdio()),
        AccountSourceKind::File => Box::new(FileAccountSource::new(&config.accounts_file)),
    };
    let accounts = source.load().await?;
    info!(
        "   ✓ {} account(s) loaded from {} source",
        accounts.len(),
        source.name()
    );

    Ok((client, accounts))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    init_tracing(reward_harvester::config::log_format());

    info!("🌾 Reward Harvester v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::from_env().context("Invalid configuration")?;

    info!("📦 Initializing infrastructure...");
    let (client, accounts) = bootstrap(&config)
        .await
        .context("Failed to start harvester")?;
    info!(
        "   ✓ Spin policy: {}, connection retry limit: {}",
        config.agent.spin_policy,
        config
            .agent
            .retry
            .max_connection_retries
            .map_or_else(|| "unlimited".to_string(), |n| n.to_string())
    );

    if config.agent.activity_max_pages <= 1 && config.agent.reconcile_activities {
        info!("   ○ Activity reconcile reads the first page only (ACTIVITY_MAX_PAGES=1)");
    }

    let harvester = Harvester::new(Arc::new(client), config.agent.clone());
    let (handle, shutdown_tx) = spawn_harvester(harvester, accounts);
    info!("🚀 Harvester running, press Ctrl+C to stop");

    shutdown_signal().await;

    let _ = shutdown_tx.send(true);
    if let Err(e) = handle.await {
        warn!(error = %e, "Harvester task ended abnormally");
    }

    info!("Shutdown complete");
    Ok(())
}
