//! Multi-account service: bootstraps every account and keeps its flows running.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use crate::domain::{Account, RewardsClient};

use super::agent::{AccountAgent, AgentConfig, shutdown_requested};

/// Starts and owns the agents of all accounts
pub struct Harvester {
    client: Arc<dyn RewardsClient>,
    config: AgentConfig,
}

impl Harvester {
    pub fn new(client: Arc<dyn RewardsClient>, config: AgentConfig) -> Self {
        Self { client, config }
    }

    /// Run the initial pass of every account in order, then keep all flows
    /// running concurrently until shutdown.
    ///
    /// Each account's initial jobs complete before the next account starts.
    #[instrument(skip_all, fields(accounts = accounts.len()))]
    pub async fn run(&self, accounts: Vec<Account>, mut shutdown: watch::Receiver<bool>) {
        let mut dispatchers: Vec<JoinHandle<()>> = Vec::with_capacity(accounts.len());

        for account in accounts {
            let (agent, jobs) =
                AccountAgent::new(account, Arc::clone(&self.client), self.config.clone());
            let agent = Arc::new(agent);

            info!(account = %agent.label(), "Starting account");
            for job in agent.initial_jobs() {
                tokio::select! {
                    _ = agent.run_chain(job) => {}
                    _ = shutdown_requested(&mut shutdown) => {
                        warn!(account = %agent.label(), "Shutdown during bootstrap");
                        agent.cancel();
                        Self::join_all(dispatchers).await;
                        return;
                    }
                }
            }

            dispatchers.push(Arc::clone(&agent).spawn_dispatcher(jobs, shutdown.clone()));
        }

        info!(count = dispatchers.len(), "All accounts started");
        Self::join_all(dispatchers).await;
        info!("Harvester stopped");
    }

    async fn join_all(dispatchers: Vec<JoinHandle<()>>) {
        for dispatcher in dispatchers {
            if let Err(e) = dispatcher.await {
                warn!(error = %e, "Account dispatcher ended abnormally");
            }
        }
    }
}

/// Spawn the harvester in the background.
///
/// Returns the task handle and a sender that stops every account when `true` is sent.
pub fn spawn_harvester(
    harvester: Harvester,
    accounts: Vec<Account>,
) -> (JoinHandle<()>, watch::Sender<bool>) {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move { harvester.run(accounts, shutdown_rx).await });
    (handle, shutdown_tx)
}
