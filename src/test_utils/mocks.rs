//! Mock implementations for testing.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use tokio::time::Instant;

use crate::domain::{
    Account, AccountSource, AccountSourceError, Activity, AuthSession, CallAuth,
    DailyRewardStatus, FlowFlags, MiningSnapshot, RewardsClient, RpcError, ServerError,
};

/// Method names recorded in the call log
pub mod methods {
    pub const AUTHENTICATE: &str = "authenticate";
    pub const START_MINING: &str = "start_mining_session";
    pub const DAILY_REWARD: &str = "get_daily_reward";
    pub const SPIN: &str = "perform_spin";
    pub const UPGRADE: &str = "upgrade_mining_speed";
    pub const LIST_ACTIVITIES: &str = "list_activities";
    pub const CLAIM_ACTIVITY: &str = "claim_activity";
}

/// One call received by [`MockRewardsClient`]
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: &'static str,
    pub install_uuid: String,
    /// Bearer token the call carried, if any
    pub token: Option<String>,
    /// Activity id for claims, offset for list calls
    pub argument: Option<Value>,
    /// Tokio clock, so paused-time tests can measure spacing
    pub at: Instant,
}

type Script<T> = Mutex<VecDeque<Result<T, RpcError>>>;

/// Scripted rewards client.
///
/// Each method pops the next scripted result. When a script runs dry the
/// method falls back to a neutral default: mining and authentication fail
/// with an unclassified server error so chains stop, everything else
/// succeeds with an empty payload.
#[derive(Default)]
pub struct MockRewardsClient {
    auth: Script<AuthSession>,
    mining: Script<MiningSnapshot>,
    daily: Script<DailyRewardStatus>,
    spins: Script<Value>,
    upgrades: Script<Value>,
    activities: Script<Vec<Activity>>,
    claims: Script<Value>,
    calls: Mutex<Vec<RecordedCall>>,
}

fn unscripted(method: &str) -> RpcError {
    RpcError::Server(ServerError::Unclassified {
        code: None,
        message: format!("no scripted response for {}", method),
    })
}

impl MockRewardsClient {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn push_auth(self, result: Result<AuthSession, RpcError>) -> Self {
        self.auth.lock().unwrap().push_back(result);
        self
    }

    #[must_use]
    pub fn push_mining(self, result: Result<MiningSnapshot, RpcError>) -> Self {
        self.mining.lock().unwrap().push_back(result);
        self
    }

    #[must_use]
    pub fn push_daily(self, result: Result<DailyRewardStatus, RpcError>) -> Self {
        self.daily.lock().unwrap().push_back(result);
        self
    }

    #[must_use]
    pub fn push_spin(self, result: Result<Value, RpcError>) -> Self {
        self.spins.lock().unwrap().push_back(result);
        self
    }

    #[must_use]
    pub fn push_upgrade(self, result: Result<Value, RpcError>) -> Self {
        self.upgrades.lock().unwrap().push_back(result);
        self
    }

    #[must_use]
    pub fn push_activities(self, result: Result<Vec<Activity>, RpcError>) -> Self {
        self.activities.lock().unwrap().push_back(result);
        self
    }

    #[must_use]
    pub fn push_claim(self, result: Result<Value, RpcError>) -> Self {
        self.claims.lock().unwrap().push_back(result);
        self
    }

    /// Snapshot of every call so far, in order
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, method: &str) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|call| call.method == method)
            .collect()
    }

    pub fn count(&self, method: &str) -> usize {
        self.calls_to(method).len()
    }

    /// Method names in call order
    pub fn methods(&self) -> Vec<&'static str> {
        self.calls().iter().map(|call| call.method).collect()
    }

    fn record(
        &self,
        method: &'static str,
        install_uuid: &str,
        token: Option<&SecretString>,
        argument: Option<Value>,
    ) {
        self.calls.lock().unwrap().push(RecordedCall {
            method,
            install_uuid: install_uuid.to_string(),
            token: token.map(|t| t.expose_secret().to_string()),
            argument,
            at: Instant::now(),
        });
    }

    fn next<T>(script: &Script<T>) -> Option<Result<T, RpcError>> {
        script.lock().unwrap().pop_front()
    }
}

#[async_trait]
impl RewardsClient for MockRewardsClient {
    async fn authenticate(
        &self,
        _init_data: &SecretString,
        install_uuid: &str,
    ) -> Result<AuthSession, RpcError> {
        self.record(methods::AUTHENTICATE, install_uuid, None, None);
        Self::next(&self.auth).unwrap_or_else(|| Err(unscripted(methods::AUTHENTICATE)))
    }

    async fn start_mining_session(&self, auth: &CallAuth) -> Result<MiningSnapshot, RpcError> {
        self.record(methods::START_MINING, &auth.install_uuid, Some(&auth.token), None);
        Self::next(&self.mining).unwrap_or_else(|| Err(unscripted(methods::START_MINING)))
    }

    async fn get_daily_reward(&self, auth: &CallAuth) -> Result<DailyRewardStatus, RpcError> {
        self.record(methods::DAILY_REWARD, &auth.install_uuid, Some(&auth.token), None);
        Self::next(&self.daily).unwrap_or_else(|| {
            Ok(DailyRewardStatus {
                spins_available: 0,
                next_streak_at: Utc::now() + ChronoDuration::days(1),
            })
        })
    }

    async fn perform_spin(&self, auth: &CallAuth, index: u32) -> Result<Value, RpcError> {
        self.record(
            methods::SPIN,
            &auth.install_uuid,
            Some(&auth.token),
            Some(json!(index)),
        );
        Self::next(&self.spins).unwrap_or_else(|| Ok(json!({"prize": {"type": "coins"}})))
    }

    async fn upgrade_mining_speed(&self, auth: &CallAuth) -> Result<Value, RpcError> {
        self.record(methods::UPGRADE, &auth.install_uuid, Some(&auth.token), None);
        Self::next(&self.upgrades).unwrap_or(Ok(Value::Null))
    }

    async fn list_activities(
        &self,
        auth: &CallAuth,
        offset: u32,
        _limit: u32,
    ) -> Result<Vec<Activity>, RpcError> {
        self.record(
            methods::LIST_ACTIVITIES,
            &auth.install_uuid,
            Some(&auth.token),
            Some(json!(offset)),
        );
        Self::next(&self.activities).unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn claim_activity(&self, auth: &CallAuth, activity_id: &Value) -> Result<Value, RpcError> {
        self.record(
            methods::CLAIM_ACTIVITY,
            &auth.install_uuid,
            Some(&auth.token),
            Some(activity_id.clone()),
        );
        Self::next(&self.claims).unwrap_or(Ok(Value::Null))
    }
}

/// Account source returning a fixed list, or failing
pub struct MockAccountSource {
    accounts: Vec<Account>,
    should_fail: bool,
}

impl MockAccountSource {
    #[must_use]
    pub fn new(accounts: Vec<Account>) -> Self {
        Self {
            accounts,
            should_fail: false,
        }
    }

    #[must_use]
    pub fn failing() -> Self {
        Self {
            accounts: Vec::new(),
            should_fail: true,
        }
    }
}

#[async_trait]
impl AccountSource for MockAccountSource {
    async fn load(&self) -> Result<Vec<Account>, AccountSourceError> {
        if self.should_fail {
            return Err(AccountSourceError::Empty);
        }
        Ok(self.accounts.clone())
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Account as loaded from a file: token held, no init data
#[must_use]
pub fn token_account(label: &str) -> Account {
    Account {
        label: label.to_string(),
        init_data: None,
        token: Some(SecretString::from(format!("token-{}", label))),
        install_uuid: format!("uuid-{}", label),
        user_id: None,
        session_id: None,
        flags: FlowFlags::all(),
        spin_policy: None,
    }
}

/// Account as entered at the prompt: init data only
#[must_use]
pub fn init_data_account(label: &str, flags: FlowFlags) -> Account {
    let mut account = Account::from_init_data(
        SecretString::from(format!("init-{}", label)),
        format!("uuid-{}", label),
        flags,
    );
    account.label = label.to_string();
    account
}

/// Successful authentication result
#[must_use]
pub fn auth_session(token: &str, first_name: &str, last_name: &str) -> AuthSession {
    AuthSession {
        token: SecretString::from(token.to_string()),
        first_name: first_name.to_string(),
        last_name: last_name.to_string(),
    }
}

/// Activity list entry
#[must_use]
pub fn activity(id: i64, activity_type: &str, is_claimed: bool) -> Activity {
    Activity {
        id: json!(id),
        activity_type: activity_type.to_string(),
        is_claimed,
    }
}
