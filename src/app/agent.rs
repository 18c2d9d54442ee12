//! Per-account flow execution.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use secrecy::SecretString;
use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::config;
use crate::domain::{
    Account, ApiDialect, CallAuth, ConfigError, FlowFlags, RewardsClient, RpcError, ServerError,
    SpinPolicy,
};

use super::flow::{FlowKind, FlowRegistry, FlowState, FollowUp, Job, JobReceiver};
use super::schedule::{
    self, ACTIVITY_CLAIM_PAUSE, BURST_SPIN_PAUSE, CLAIM_JITTER_MINUTES, MINING_RETRY_MINUTES,
    RetryPolicy, SPIN_INTERVAL_MINUTES, STREAK_JITTER_MINUTES,
};

/// Behaviour shared by every account agent
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub dialect: ApiDialect,
    /// Used when the account does not choose its own policy
    pub spin_policy: SpinPolicy,
    pub retry: RetryPolicy,
    pub activity_page_size: u32,
    /// Upper bound on activity pages fetched per reconcile
    pub activity_max_pages: u32,
    /// Reconcile unclaimed activities before the first mining claim of token accounts
    pub reconcile_activities: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            dialect: ApiDialect::default(),
            spin_policy: SpinPolicy::default(),
            retry: RetryPolicy::default(),
            activity_page_size: 100,
            activity_max_pages: 1,
            reconcile_activities: true,
        }
    }
}

impl AgentConfig {
    pub fn from_env(dialect: ApiDialect) -> Result<Self, ConfigError> {
        Ok(Self {
            dialect,
            spin_policy: config::parse_var("SPIN_POLICY", SpinPolicy::default())?,
            retry: RetryPolicy::from_env()?,
            activity_page_size: config::parse_var("ACTIVITY_PAGE_SIZE", 100u32)?,
            activity_max_pages: config::parse_var("ACTIVITY_MAX_PAGES", 1u32)?,
            reconcile_activities: config::parse_flag(
                "RECONCILE_ACTIVITIES",
                config::var("RECONCILE_ACTIVITIES"),
                true,
            )?,
        })
    }

    /// The flat dialect checks the daily reward after every successful mining claim
    #[must_use]
    pub fn daily_after_mining(&self) -> bool {
        self.dialect == ApiDialect::Flat
    }
}

/// Resolves once shutdown has been requested or its sender is gone
pub async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Drives every flow of one account.
///
/// Jobs of one account run strictly one after another: either inline as
/// part of a chain, or from the dispatcher when a timer fires.
pub struct AccountAgent {
    account: Account,
    token: RwLock<Option<SecretString>>,
    display_name: RwLock<Option<String>>,
    client: Arc<dyn RewardsClient>,
    config: AgentConfig,
    registry: FlowRegistry,
}

impl AccountAgent {
    /// Build the agent and the receiver its dispatcher consumes
    pub fn new(
        account: Account,
        client: Arc<dyn RewardsClient>,
        config: AgentConfig,
    ) -> (Self, JobReceiver) {
        let (registry, jobs) = FlowRegistry::channel();
        let agent = Self {
            token: RwLock::new(account.token.clone()),
            display_name: RwLock::new(None),
            account,
            client,
            config,
            registry,
        };
        (agent, jobs)
    }

    pub fn label(&self) -> &str {
        &self.account.label
    }

    /// Name reported by the last successful authentication
    pub async fn display_name(&self) -> Option<String> {
        self.display_name.read().await.clone()
    }

    pub async fn token(&self) -> Option<SecretString> {
        self.token.read().await.clone()
    }

    pub fn spin_policy(&self) -> SpinPolicy {
        self.account.spin_policy.unwrap_or(self.config.spin_policy)
    }

    pub fn flow_state(&self, kind: FlowKind) -> FlowState {
        self.registry.state(kind)
    }

    pub fn pending_timers(&self) -> usize {
        self.registry.pending_timers()
    }

    pub fn cancel_flow(&self, kind: FlowKind) {
        self.registry.cancel(kind);
    }

    /// Cancel every pending timer of this account
    pub fn cancel(&self) {
        self.registry.cancel_all();
    }

    /// Jobs that start this account's flows
    #[must_use]
    pub fn initial_jobs(&self) -> Vec<Job> {
        let account = &self.account;
        if account.token.is_some() {
            let mut jobs = Vec::new();
            if self.config.reconcile_activities {
                jobs.push(Job::ReconcileActivities);
            }
            if account.flags.mining {
                jobs.push(Job::claim_mining());
            }
            jobs
        } else if account.can_authenticate() {
            vec![Job::Authenticate {
                flags: account.flags,
            }]
        } else {
            warn!(account = %account.label, "Account has neither token nor init data, skipping");
            Vec::new()
        }
    }

    /// Run `job` and everything it triggers immediately.
    ///
    /// Immediate follow-ups run depth first in the order they were returned;
    /// delayed ones are armed on the registry.
    #[instrument(skip(self), fields(account = %self.account.label))]
    pub async fn run_chain(&self, job: Job) {
        let mut queue = VecDeque::from([FollowUp::now(job)]);

        while let Some(FollowUp { job, delay }) = queue.pop_front() {
            if !delay.is_zero() {
                self.registry.arm(job, delay);
                continue;
            }

            let kind = job.kind();
            self.registry.begin(kind);
            let follow_ups = self.execute(job).await;
            self.registry.finish(kind);

            for follow_up in follow_ups.into_iter().rev() {
                queue.push_front(follow_up);
            }
        }
    }

    /// Consume fired timers until shutdown
    pub fn spawn_dispatcher(
        self: Arc<Self>,
        mut jobs: JobReceiver,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_requested(&mut shutdown) => break,
                    scheduled = jobs.recv() => {
                        let Some(scheduled) = scheduled else { break };
                        let kind = scheduled.job.kind();
                        if !self.registry.is_current(kind, scheduled.generation) {
                            debug!(account = %self.account.label, flow = %kind, "Dropping superseded job");
                            continue;
                        }
                        tokio::select! {
                            _ = self.run_chain(scheduled.job) => {}
                            _ = shutdown_requested(&mut shutdown) => break,
                        }
                    }
                }
            }

            self.registry.cancel_all();
            info!(account = %self.account.label, "Account agent stopped");
        })
    }

    async fn execute(&self, job: Job) -> Vec<FollowUp> {
        match job {
            Job::Authenticate { flags } => self.authenticate(flags).await,
            Job::ClaimMining { attempt } => self.claim_mining(attempt).await,
            Job::ClaimDailyReward {
                retry_on_zero,
                attempt,
            } => self.claim_daily_reward(retry_on_zero, attempt).await,
            Job::Spin {
                remaining,
                index,
                next_streak_at,
                attempt,
            } => match self.spin_policy() {
                SpinPolicy::Spread => {
                    self.spin_once(remaining, index, next_streak_at, attempt)
                        .await
                }
                SpinPolicy::Burst => self.spin_burst(remaining).await,
            },
            Job::Upgrade => self.upgrade().await,
            Job::ReconcileActivities => self.reconcile_activities().await,
        }
    }

    async fn credentials(&self) -> Result<CallAuth, RpcError> {
        let token = self.token.read().await.clone().ok_or(RpcError::MissingToken)?;
        Ok(CallAuth::new(token, self.account.install_uuid.clone()))
    }

    /// Shared recovery for the retryable flows
    fn recover(&self, job: Job, error: RpcError) -> Vec<FollowUp> {
        let kind = job.kind();
        if error.needs_reauthentication() {
            return self.reauthenticate(kind, &error);
        }
        match error {
            RpcError::ConnectionReset(ref reason) => {
                let attempt = job.attempt();
                if !self.config.retry.allows_retry(attempt) {
                    error!(flow = %kind, attempt, reason = %reason, "Connection reset, retry limit reached");
                    return Vec::new();
                }
                let delay = self.config.retry.connection_reset_delay;
                warn!(
                    flow = %kind,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Connection reset, retrying"
                );
                job.retried()
                    .map(|job| vec![FollowUp::after(job, delay)])
                    .unwrap_or_default()
            }
            other => {
                error!(flow = %kind, error = %other, "Flow stopped");
                Vec::new()
            }
        }
    }

    fn reauthenticate(&self, kind: FlowKind, error: &RpcError) -> Vec<FollowUp> {
        if !self.account.can_authenticate() {
            error!(flow = %kind, error = %error, "Cannot re-authenticate without init data, flow stopped");
            return Vec::new();
        }
        let delay = self.config.retry.reauth_delay;
        warn!(
            flow = %kind,
            error = %error,
            delay_ms = delay.as_millis() as u64,
            "Re-authentication scheduled"
        );
        vec![FollowUp::after(
            Job::Authenticate {
                flags: FlowFlags::all(),
            },
            delay,
        )]
    }

    async fn authenticate(&self, flags: FlowFlags) -> Vec<FollowUp> {
        let Some(init_data) = &self.account.init_data else {
            error!("No init data held, cannot authenticate");
            return Vec::new();
        };

        let session = match self
            .client
            .authenticate(init_data, &self.account.install_uuid)
            .await
        {
            Ok(session) => session,
            Err(e) => {
                error!(error = %e, "Authentication failed");
                return Vec::new();
            }
        };

        let name = session.display_name();
        info!("Name: {}", name);
        *self.token.write().await = Some(session.token);
        *self.display_name.write().await = Some(name);

        let mut follow_ups = Vec::new();
        if flags.mining {
            follow_ups.push(FollowUp::now(Job::claim_mining()));
        }
        if flags.daily {
            follow_ups.push(FollowUp::now(Job::daily_reward(false)));
        }
        if flags.upgrade {
            follow_ups.push(FollowUp::now(Job::Upgrade));
        }
        follow_ups
    }

    async fn claim_mining(&self, attempt: u32) -> Vec<FollowUp> {
        let job = Job::ClaimMining { attempt };
        let auth = match self.credentials().await {
            Ok(auth) => auth,
            Err(e) => return self.recover(job, e),
        };

        match self.client.start_mining_session(&auth).await {
            Ok(snapshot) => {
                let jitter = schedule::random_minutes(CLAIM_JITTER_MINUTES);
                let minutes = schedule::next_claim_minutes(snapshot.amount, snapshot.rate, jitter);
                let delay = schedule::minutes_to_duration(minutes);
                info!(
                    amount = snapshot.amount,
                    rate = snapshot.rate,
                    delay_ms = delay.as_millis() as u64,
                    "Mining session claimed, next claim in {:.1} minutes",
                    minutes
                );

                let mut follow_ups = Vec::with_capacity(2);
                if self.config.daily_after_mining() {
                    follow_ups.push(FollowUp::now(Job::daily_reward(false)));
                }
                follow_ups.push(FollowUp::after(Job::claim_mining(), delay));
                follow_ups
            }
            Err(RpcError::Server(ServerError::MiningSessionInProgress)) => {
                let delay = schedule::whole_minutes(schedule::random_minutes(MINING_RETRY_MINUTES));
                info!(
                    delay_ms = delay.as_millis() as u64,
                    "Mining session in progress, checking daily reward"
                );
                vec![
                    FollowUp::now(Job::daily_reward(true)),
                    FollowUp::after(Job::claim_mining(), delay),
                ]
            }
            Err(e) => self.recover(job, e),
        }
    }

    async fn claim_daily_reward(&self, retry_on_zero: bool, attempt: u32) -> Vec<FollowUp> {
        let job = Job::ClaimDailyReward {
            retry_on_zero,
            attempt,
        };
        let auth = match self.credentials().await {
            Ok(auth) => auth,
            Err(e) => return self.recover(job, e),
        };

        match self.client.get_daily_reward(&auth).await {
            Ok(status) if status.spins_available > 0 => {
                info!(
                    spins = status.spins_available,
                    next_streak_at = %status.next_streak_at,
                    "Daily reward claimed"
                );
                vec![FollowUp::now(Job::Spin {
                    remaining: status.spins_available,
                    index: 0,
                    next_streak_at: status.next_streak_at,
                    attempt: 0,
                })]
            }
            Ok(status) if retry_on_zero => {
                let jitter = schedule::random_minutes(STREAK_JITTER_MINUTES);
                let delay = schedule::until_next_streak(status.next_streak_at, jitter, Utc::now());
                info!(
                    next_streak_at = %status.next_streak_at,
                    delay_ms = delay.as_millis() as u64,
                    "No spins available, checking again at next streak"
                );
                vec![FollowUp::after(Job::daily_reward(false), delay)]
            }
            Ok(_) => {
                info!("No spins available");
                Vec::new()
            }
            Err(e) => self.recover(job, e),
        }
    }

    async fn spin_once(
        &self,
        remaining: u32,
        index: u32,
        next_streak_at: chrono::DateTime<Utc>,
        attempt: u32,
    ) -> Vec<FollowUp> {
        let job = Job::Spin {
            remaining,
            index,
            next_streak_at,
            attempt,
        };
        if remaining == 0 {
            return Vec::new();
        }
        let auth = match self.credentials().await {
            Ok(auth) => auth,
            Err(e) => return self.recover(job, e),
        };

        match self.client.perform_spin(&auth, index).await {
            Ok(prize) => {
                let left = remaining - 1;
                info!(prize = %prize, remaining = left, "Spin performed");

                if left > 0 {
                    let delay =
                        schedule::whole_minutes(schedule::random_minutes(SPIN_INTERVAL_MINUTES));
                    vec![FollowUp::after(
                        Job::Spin {
                            remaining: left,
                            index: index + 1,
                            next_streak_at,
                            attempt: 0,
                        },
                        delay,
                    )]
                } else {
                    let jitter = schedule::random_minutes(STREAK_JITTER_MINUTES);
                    let delay = schedule::until_next_streak(next_streak_at, jitter, Utc::now());
                    info!(
                        delay_ms = delay.as_millis() as u64,
                        "Spins exhausted, daily reward scheduled"
                    );
                    vec![FollowUp::after(Job::daily_reward(false), delay)]
                }
            }
            Err(e) => self.recover(job, e),
        }
    }

    async fn spin_burst(&self, remaining: u32) -> Vec<FollowUp> {
        let auth = match self.credentials().await {
            Ok(auth) => auth,
            Err(e) => {
                error!(error = %e, "Spins skipped");
                return Vec::new();
            }
        };

        for index in 0..remaining {
            let spin = index + 1;
            match self.client.perform_spin(&auth, index).await {
                Ok(prize) => info!(spin, of = remaining, prize = %prize, "Spin performed"),
                Err(RpcError::Server(e)) => {
                    warn!(spin, of = remaining, error = %e, "Spin rejected");
                }
                Err(e) => {
                    error!(spin, of = remaining, error = %e, "Spinning stopped");
                    break;
                }
            }
            tokio::time::sleep(BURST_SPIN_PAUSE).await;
        }
        Vec::new()
    }

    async fn upgrade(&self) -> Vec<FollowUp> {
        let result = match self.credentials().await {
            Ok(auth) => self.client.upgrade_mining_speed(&auth).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(response) => info!(response = %response, "Mining speed upgraded"),
            Err(e) => warn!(error = %e, "Mining speed upgrade failed"),
        }
        Vec::new()
    }

    async fn reconcile_activities(&self) -> Vec<FollowUp> {
        let auth = match self.credentials().await {
            Ok(auth) => auth,
            Err(e) => {
                error!(error = %e, "Activity reconcile skipped");
                return Vec::new();
            }
        };

        let page_size = self.config.activity_page_size.max(1);
        let mut unclaimed = Vec::new();
        for page in 0..self.config.activity_max_pages.max(1) {
            let offset = page * page_size;
            let activities = match self.client.list_activities(&auth, offset, page_size).await {
                Ok(activities) => activities,
                Err(e) => {
                    error!(offset, error = %e, "Failed to list activities");
                    return Vec::new();
                }
            };
            let fetched = activities.len();
            unclaimed.extend(
                activities
                    .into_iter()
                    .filter(|activity| activity.is_unclaimed_mining_reward()),
            );
            if fetched < page_size as usize {
                break;
            }
        }

        if unclaimed.is_empty() {
            info!("No unclaimed rewards");
            return Vec::new();
        }

        info!(count = unclaimed.len(), "Claiming unclaimed mining rewards");
        for activity in &unclaimed {
            match self.client.claim_activity(&auth, &activity.id).await {
                Ok(_) => info!(activity_id = %activity.id, "Activity claimed"),
                Err(e) => warn!(activity_id = %activity.id, error = %e, "Activity claim failed"),
            }
            tokio::time::sleep(ACTIVITY_CLAIM_PAUSE).await;
        }
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::domain::{DailyRewardStatus, MiningSnapshot};
    use crate::test_utils::mocks::{MockRewardsClient, methods, token_account};

    fn agent_with(
        client: MockRewardsClient,
        config: AgentConfig,
    ) -> (Arc<AccountAgent>, Arc<MockRewardsClient>) {
        let client = Arc::new(client);
        let (agent, _jobs) = AccountAgent::new(token_account("alice"), client.clone(), config);
        (Arc::new(agent), client)
    }

    #[test]
    fn test_daily_after_mining_only_for_flat() {
        let mut config = AgentConfig::default();
        assert!(!config.daily_after_mining());
        config.dialect = ApiDialect::Flat;
        assert!(config.daily_after_mining());
    }

    #[tokio::test]
    async fn test_initial_jobs_for_token_account() {
        let (agent, _) = agent_with(MockRewardsClient::new(), AgentConfig::default());
        assert_eq!(
            agent.initial_jobs(),
            vec![Job::ReconcileActivities, Job::claim_mining()]
        );

        let config = AgentConfig {
            reconcile_activities: false,
            ..Default::default()
        };
        let (agent, _) = agent_with(MockRewardsClient::new(), config);
        assert_eq!(agent.initial_jobs(), vec![Job::claim_mining()]);
    }

    #[tokio::test]
    async fn test_spin_policy_override() {
        let mut account = token_account("bob");
        account.spin_policy = Some(SpinPolicy::Burst);
        let (agent, _) =
            AccountAgent::new(account, Arc::new(MockRewardsClient::new()), AgentConfig::default());
        assert_eq!(agent.spin_policy(), SpinPolicy::Burst);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unclassified_error_stops_flow() {
        let client = MockRewardsClient::new().push_mining(Err(RpcError::Server(
            ServerError::Unclassified {
                code: Some(500),
                message: "boom".into(),
            },
        )));
        let (agent, client) = agent_with(client, AgentConfig::default());

        agent.run_chain(Job::claim_mining()).await;

        assert_eq!(client.count(methods::START_MINING), 1);
        assert_eq!(agent.pending_timers(), 0);
        assert_eq!(agent.flow_state(FlowKind::Mining), FlowState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unauthorized_without_init_data_stops() {
        let client = MockRewardsClient::new()
            .push_mining(Err(RpcError::Server(ServerError::Unauthorized)));
        let (agent, _) = agent_with(client, AgentConfig::default());

        agent.run_chain(Job::claim_mining()).await;

        assert_eq!(agent.flow_state(FlowKind::Authenticate), FlowState::Idle);
        assert_eq!(agent.pending_timers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mining_success_schedules_claim() {
        let client = MockRewardsClient::new().push_mining(Ok(MiningSnapshot {
            amount: 10.0,
            rate: 20.0,
        }));
        let (agent, client) = agent_with(client, AgentConfig::default());

        agent.run_chain(Job::claim_mining()).await;

        // 30 minutes of accrual plus 1..=10 minutes of jitter
        let due = agent.flow_state(FlowKind::Mining).time_until_due().unwrap();
        assert!(due >= Duration::from_secs(31 * 60));
        assert!(due <= Duration::from_secs(40 * 60));
        assert_eq!(client.count(methods::DAILY_REWARD), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flat_mining_success_checks_daily_first() {
        let client = MockRewardsClient::new()
            .push_mining(Ok(MiningSnapshot {
                amount: 1.0,
                rate: 1.0,
            }))
            .push_daily(Ok(DailyRewardStatus {
                spins_available: 0,
                next_streak_at: Utc::now(),
            }));
        let config = AgentConfig {
            dialect: ApiDialect::Flat,
            ..Default::default()
        };
        let (agent, client) = agent_with(client, config);

        agent.run_chain(Job::claim_mining()).await;

        assert_eq!(
            client.methods(),
            vec![methods::START_MINING, methods::DAILY_REWARD]
        );
        assert!(matches!(
            agent.flow_state(FlowKind::Mining),
            FlowState::Scheduled { .. }
        ));
        // Zero spins without the retry flag ends the daily flow
        assert_eq!(agent.flow_state(FlowKind::DailyReward), FlowState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_upgrade_failure_is_not_retried() {
        let client = MockRewardsClient::new()
            .push_upgrade(Err(RpcError::ConnectionReset("reset by peer".into())));
        let (agent, client) = agent_with(client, AgentConfig::default());

        agent.run_chain(Job::Upgrade).await;

        assert_eq!(client.count(methods::UPGRADE), 1);
        assert_eq!(agent.pending_timers(), 0);
    }
}
